use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{AuthAdapters, MobileOtpAdapter, SessionManager};
use crate::config::AppConfig;
use crate::data::Data;
use crate::files::LocalFilesAdapter;
use crate::functions::FunctionRegistry;
use crate::handlers::{classes, files, functions, system};
use crate::middleware::request_context_middleware;
use crate::schema::{Schema, SchemaError};
use crate::store::{MemoryStore, ObjectStore};
use crate::triggers::TriggerPipeline;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub data: Data,
    pub functions: Arc<FunctionRegistry>,
    pub sessions: Arc<SessionManager>,
    pub auth_adapters: Arc<AuthAdapters>,
    pub files: Arc<LocalFilesAdapter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ObjectStore>) -> Result<Self, SchemaError> {
        let schema = Arc::new(Schema::standard()?);
        let files = Arc::new(LocalFilesAdapter::from_config(&config));
        let triggers = Arc::new(TriggerPipeline::standard(files.clone()));

        let mut auth_adapters = AuthAdapters::new();
        auth_adapters.register(Arc::new(MobileOtpAdapter::from_config(&config)));

        Ok(Self {
            data: Data::new(store, schema, triggers),
            functions: Arc::new(FunctionRegistry::standard()),
            sessions: Arc::new(SessionManager::from_config(&config.security)),
            auth_adapters: Arc::new(auth_adapters),
            files,
            config,
        })
    }

    /// Memory-backed state for the given configuration.
    pub fn in_memory(config: AppConfig) -> Result<Self, SchemaError> {
        Self::new(Arc::new(config), Arc::new(MemoryStore::new()))
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        match Self::in_memory(AppConfig::development()) {
            Ok(state) => state,
            Err(e) => panic!("standard schema is invalid: {}", e),
        }
    }
}

/// Routes under the configured mount path.
fn api_routes(state: &AppState) -> Router<AppState> {
    let upload_limit = state.config.files.max_upload_bytes;

    Router::new()
        .route("/health", get(system::health))
        .route("/serverInfo", get(system::server_info))
        .route("/functions/:name", any(functions::call_function))
        .route(
            "/files/:filename",
            post(files::upload_file)
                .delete(files::delete_file)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files/:app_id/:filename", get(files::get_file))
        .route("/classes/:class_name", get(classes::find_objects))
        .route("/classes/:class_name/:object_id", get(classes::get_object))
        .route("/schemas", get(classes::list_schemas))
        .route("/schemas/:class_name", get(classes::get_schema))
        .fallback(system::route_not_allowed)
}

pub fn router(state: AppState) -> Router {
    let mount = state.config.server.mount_path.clone();
    let body_limit = state.config.server.max_body_bytes;

    let routes = if mount.is_empty() {
        api_routes(&state)
    } else {
        Router::new()
            .route("/health", get(system::health))
            .nest(&mount, api_routes(&state))
    };

    routes
        .layer(middleware::from_fn_with_state(state.clone(), request_context_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
