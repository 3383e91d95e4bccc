use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::RequestContext;

/// GET /health - liveness plus a store ping
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.data.store().ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

/// GET /{mount}/serverInfo - what this server offers
pub async fn server_info(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "appName": config.app.app_name,
        "appId": config.app.app_id,
        "version": env!("CARGO_PKG_VERSION"),
        "mountPath": config.server.mount_path,
        "features": {
            "functions": state.functions.len(),
            "files": { "upload": true, "range": true },
            "authProviders": ["mobileAuth"],
        },
    }))
}

/// Any other path under the mount. Only master-key callers learn it does not exist.
pub async fn route_not_allowed(uri: Uri, Extension(context): Extension<RequestContext>) -> ApiError {
    if context.master {
        ApiError::not_found(format!("No route for {}", uri.path()))
    } else {
        tracing::warn!("Rejected request to restricted path {}", uri.path());
        ApiError::forbidden("Route not allowed")
    }
}
