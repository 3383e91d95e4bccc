//! Read-only class access for clients, enforcing class-level permissions and
//! object ACLs. Writes go through functions.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::RequestContext;
use crate::schema::ClpOperation;
use crate::store::{self, StoredObject};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct FindParams {
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub count: Option<String>,
}

/// Roles of the caller, for CLP and ACL checks.
async fn caller_roles(state: &AppState, context: &RequestContext) -> Result<Vec<String>, ApiError> {
    match &context.caller {
        Some(caller) => state.data.user_roles(&caller.user_id).await,
        None => Ok(Vec::new()),
    }
}

async fn check_clp(
    state: &AppState,
    context: &RequestContext,
    class_name: &str,
    op: ClpOperation,
    roles: &[String],
) -> Result<(), ApiError> {
    if context.master {
        return Ok(());
    }
    let clp = state.data.schema().clp(class_name)?;
    let user_id = context.caller.as_ref().map(|c| c.user_id.as_str());
    if clp.allows(op, user_id, roles) {
        Ok(())
    } else if user_id.is_none() {
        Err(ApiError::authentication_required())
    } else {
        Err(ApiError::forbidden(format!(
            "Permission denied for action {:?} on class {}",
            op, class_name
        )))
    }
}

fn readable(context: &RequestContext, object: &StoredObject, roles: &[String]) -> bool {
    if context.master {
        return true;
    }
    match &object.acl {
        None => true,
        Some(acl) => acl.can_read(context.caller.as_ref().map(|c| c.user_id.as_str()), roles),
    }
}

/// GET /{mount}/classes/:class_name - query objects
pub async fn find_objects(
    State(state): State<AppState>,
    Path(class_name): Path<String>,
    Extension(context): Extension<RequestContext>,
    Query(params): Query<FindParams>,
) -> Result<Json<Value>, ApiError> {
    let roles = caller_roles(&state, &context).await?;
    check_clp(&state, &context, &class_name, ClpOperation::Find, &roles).await?;

    let mut query = store::Query::new(&class_name);
    if let Some(raw) = params.where_clause.as_deref().filter(|w| !w.trim().is_empty()) {
        let where_clause: Map<String, Value> = serde_json::from_str(raw)
            .map_err(|_| ApiError::invalid_json("where must be a JSON object"))?;
        query = query.with_where(where_clause);
    }
    if let Some(order) = &params.order {
        query = query.order_by(order);
    }

    if !context.master {
        query.reject_internal_fields()?;
    }

    // ACLs are checked per object, so paging and counting happen after the
    // filter. Counting raw matches would reveal hidden objects.
    let matching = state.data.find(&query).await?;
    let visible: Vec<&StoredObject> = matching
        .iter()
        .filter(|o| readable(&context, o, &roles))
        .collect();
    let count = (params.count.as_deref() == Some("1")).then_some(visible.len());

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let results: Vec<Value> = visible
        .into_iter()
        .skip(params.skip.unwrap_or(0))
        .take(limit)
        .map(StoredObject::to_json)
        .collect();

    let mut body = json!({ "results": results });
    if let Some(count) = count {
        body["count"] = json!(count);
    }
    Ok(Json(body))
}

/// GET /{mount}/classes/:class_name/:object_id - fetch one object
pub async fn get_object(
    State(state): State<AppState>,
    Path((class_name, object_id)): Path<(String, String)>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    let roles = caller_roles(&state, &context).await?;
    check_clp(&state, &context, &class_name, ClpOperation::Get, &roles).await?;

    match state.data.get(&class_name, &object_id).await? {
        Some(object) if readable(&context, &object, &roles) => Ok(Json(object.to_json())),
        _ => Err(ApiError::not_found("Object not found.")),
    }
}

/// GET /{mount}/schemas - every class definition (master key)
pub async fn list_schemas(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    if !context.master {
        return Err(ApiError::forbidden("Master key is required"));
    }
    Ok(Json(json!({ "results": state.data.schema().definitions() })))
}

/// GET /{mount}/schemas/:class_name - one class definition (master key)
pub async fn get_schema(
    State(state): State<AppState>,
    Path(class_name): Path<String>,
    Extension(context): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    if !context.master {
        return Err(ApiError::forbidden("Master key is required"));
    }
    Ok(Json(state.data.schema().schema_definition(&class_name)?))
}
