use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::Method,
    Extension, Json,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::FunctionRequest;
use crate::middleware::{is_master_key, RequestContext};

/// Body fields clients use to pass request metadata instead of headers.
const MASTER_KEY_FIELDS: &[&str] = &["masterKey", "_MasterKey"];
const SESSION_TOKEN_FIELD: &str = "_SessionToken";

fn parse_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ApiError::invalid_json("Error parsing JSON body")),
    }
}

/// ANY /{mount}/functions/:name - run a registered function
pub async fn call_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mut params: Map<String, Value> = query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let mut body = parse_body(&body)?;

    let mut master = context.master;
    for field in MASTER_KEY_FIELDS {
        if let Some(key) = body.remove(*field) {
            master |= is_master_key(&state, key.as_str());
        }
    }

    let mut caller = context.caller;
    if let Some(Value::String(token)) = body.remove(SESSION_TOKEN_FIELD) {
        if caller.is_none() {
            caller = Some(state.sessions.resolve(&state.data, &token).await?);
        }
    }

    // Underscore fields are request metadata, never parameters.
    params.extend(body.into_iter().filter(|(k, _)| !k.starts_with('_')));

    let mut request = FunctionRequest::new(params, caller);
    request.master = master;

    tracing::debug!(request_id = %context.request_id, "Calling function {} via {}", name, method);
    let functions = state.functions.clone();
    let result = functions.invoke(state, &name, &method, request).await?;
    Ok(Json(result))
}
