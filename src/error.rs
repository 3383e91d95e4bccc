// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::SessionError;
use crate::files::FileError;
use crate::schema::SchemaError;
use crate::store::StoreError;
use crate::triggers::TriggerError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 402 Payment Required (insufficient wallet balance)
    PaymentRequired(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 405 Method Not Allowed
    MethodNotAllowed(String),

    // 409 Conflict
    Conflict(String),

    // 413 Payload Too Large
    PayloadTooLarge(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 500, role lookup failed while authorizing a call; cause is logged, not returned
    AuthorizationFailed { cause: String },

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::PaymentRequired(_) => 402,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed(_) => 405,
            ApiError::Conflict(_) => 409,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::InternalServerError(_) => 500,
            ApiError::AuthorizationFailed { .. } => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::PaymentRequired(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::MethodNotAllowed(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::PayloadTooLarge(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::AuthorizationFailed { .. } => "Authorization check failed",
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError { message, field_errors } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::PaymentRequired(_) => "PAYMENT_REQUIRED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::AuthorizationFailed { .. } => "AUTHORIZATION_FAILED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<HashMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    /// Validation failure pinned to a single field.
    pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut field_errors = HashMap::new();
        field_errors.insert(field.into(), message.clone());
        ApiError::validation_error(message, Some(field_errors))
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn authentication_required() -> Self {
        ApiError::Unauthorized("Authentication required".to_string())
    }

    pub fn payment_required(message: impl Into<String>) -> Self {
        ApiError::PaymentRequired(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        ApiError::MethodNotAllowed(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::PayloadTooLarge(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn authorization_failed(cause: impl std::fmt::Display) -> Self {
        ApiError::AuthorizationFailed {
            cause: cause.to_string(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert other error types to ApiError
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { class_name, .. } => {
                ApiError::not_found(format!("{} not found", class_name))
            }
            StoreError::VersionConflict { class_name, id } => {
                tracing::warn!("Concurrent modification of {}/{}", class_name, id);
                ApiError::conflict("The record was modified by another request, please retry")
            }
            StoreError::Duplicate { class_name, id } => {
                ApiError::conflict(format!("{} {} already exists", class_name, id))
            }
            StoreError::InvalidQuery(msg) => ApiError::bad_request(msg),
            StoreError::Unavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            StoreError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
            StoreError::Serialization(e) => {
                tracing::error!("Stored document could not be decoded: {}", e);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<SchemaError> for ApiError {
    fn from(err: SchemaError) -> Self {
        match &err {
            SchemaError::UnknownClass(class_name) => {
                ApiError::not_found(format!("Class {} does not exist", class_name))
            }
            SchemaError::UnknownField { field, .. }
            | SchemaError::InvalidType { field, .. }
            | SchemaError::InvalidPointer { field, .. }
            | SchemaError::MissingRequired { field, .. }
            | SchemaError::DanglingPointer { field, .. } => {
                ApiError::field_error(field.clone(), err.to_string())
            }
            SchemaError::DuplicateClass(_)
            | SchemaError::DuplicateField { .. }
            | SchemaError::UnknownTarget { .. } => {
                tracing::error!("Schema definition error: {}", err);
                ApiError::internal_server_error("Schema definition error")
            }
        }
    }
}

impl From<FileError> for ApiError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::InvalidFilename(msg) => ApiError::bad_request(msg),
            FileError::NotFound(_) => ApiError::not_found("File not found"),
            FileError::Io(e) => {
                tracing::error!("File storage error: {}", e);
                ApiError::internal_server_error("File storage error")
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidToken(_) | SessionError::Revoked => {
                ApiError::unauthorized("Invalid session token")
            }
            SessionError::InvalidSecret | SessionError::TokenGeneration(_) => {
                tracing::error!("Session error: {}", err);
                ApiError::internal_server_error("Session could not be created")
            }
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Rejected(msg) => ApiError::bad_request(msg),
            TriggerError::Failed { trigger, message } => {
                tracing::error!("Trigger {} failed: {}", trigger, message);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            TriggerError::Timeout(trigger) => {
                tracing::error!("Trigger {} timed out", trigger);
                ApiError::internal_server_error("Request processing timed out")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if let ApiError::AuthorizationFailed { cause } = &self {
            tracing::error!("Role lookup failed during authorization: {}", cause);
        }
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_failure_hides_cause() {
        let err = ApiError::authorization_failed("connection reset");
        assert_eq!(err.status_code(), 500);
        let body = err.to_json();
        assert_eq!(body["message"], "Authorization check failed");
        assert_eq!(body["code"], "AUTHORIZATION_FAILED");
    }

    #[test]
    fn field_error_carries_field_map() {
        let body = ApiError::field_error("amount", "Amount must be greater than zero").to_json();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["field_errors"]["amount"], "Amount must be greater than zero");
    }

    #[test]
    fn version_conflict_maps_to_409() {
        let err: ApiError = StoreError::VersionConflict {
            class_name: "Wallet".to_string(),
            id: "w1".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), 409);
    }
}
