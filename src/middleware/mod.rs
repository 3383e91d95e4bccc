pub mod auth;

pub use auth::{extract_session_token, is_master_key, request_context_middleware, RequestContext};
