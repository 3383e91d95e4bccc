use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

pub const SESSION_TOKEN_HEADER: &str = "x-parse-session-token";
pub const MASTER_KEY_HEADER: &str = "x-parse-master-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Who is calling, resolved once per request.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub caller: Option<Caller>,
    pub master: bool,
    pub request_id: Uuid,
}

/// Resolve the session token and master key into a `RequestContext` extension.
/// A token that does not resolve is rejected outright. The request id is
/// taken from `X-Request-Id` when it parses as a UUID and echoed back.
pub async fn request_context_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (master, request_id, token) = {
        let headers = request.headers();
        let request_id = header_value(headers, REQUEST_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .unwrap_or_else(Uuid::new_v4);
        (
            is_master_key(&state, header_value(headers, MASTER_KEY_HEADER)),
            request_id,
            extract_session_token(headers),
        )
    };

    let caller = match token {
        Some(token) => Some(state.sessions.resolve(&state.data, &token).await?),
        None => None,
    };

    request.extensions_mut().insert(RequestContext {
        caller,
        master,
        request_id,
    });
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

pub fn is_master_key(state: &AppState, presented: Option<&str>) -> bool {
    let expected = &state.config.app.master_key;
    !expected.is_empty() && presented == Some(expected.as_str())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Session token from `X-Parse-Session-Token`, else `Authorization: Bearer`.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = header_value(headers, SESSION_TOKEN_HEADER) {
        return Some(token.to_string());
    }
    header_value(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
