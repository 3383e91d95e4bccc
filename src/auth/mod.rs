//! Sessions, passwords and third-party auth providers.

pub mod adapters;
pub mod mobile;
pub mod password;
pub mod session;

use thiserror::Error;

pub use adapters::{AuthAdapter, AuthAdapters};
pub use mobile::MobileOtpAdapter;
pub use session::{Claims, SessionManager};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session token: {0}")]
    InvalidToken(String),

    #[error("Session has been revoked")]
    Revoked,

    #[error("Session secret is not configured")]
    InvalidSecret,

    #[error("Session token could not be generated: {0}")]
    TokenGeneration(String),
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub username: Option<String>,
    pub session_id: String,
}

impl Caller {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.user_id)
    }
}
