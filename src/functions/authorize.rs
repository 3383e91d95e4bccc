//! Role check run before a function handler.

use async_trait::async_trait;

use crate::auth::Caller;
use crate::data::Data;
use crate::error::ApiError;

/// Resolves which of the given role names a user holds.
#[async_trait]
pub trait RoleLookup: Send + Sync {
    async fn held_roles(&self, user_id: &str, candidates: &[String]) -> Result<Vec<String>, ApiError>;
}

#[async_trait]
impl RoleLookup for Data {
    async fn held_roles(&self, user_id: &str, candidates: &[String]) -> Result<Vec<String>, ApiError> {
        let roles = self.user_roles(user_id).await?;
        Ok(roles.into_iter().filter(|r| candidates.contains(r)).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleRequirement {
    pub roles: Vec<String>,
    pub require_all: bool,
    pub message: Option<String>,
}

impl RoleRequirement {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    fn denial(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => format!(
                "Access denied. Required {} these roles: {}",
                if self.require_all { "all" } else { "one of" },
                self.roles.join(", ")
            ),
        }
    }
}

/// No requirement passes everyone. Otherwise the caller must be signed in
/// before roles are looked up, and must hold all or any of them.
pub async fn authorize(
    requirement: &RoleRequirement,
    caller: Option<&Caller>,
    lookup: &dyn RoleLookup,
) -> Result<(), ApiError> {
    if requirement.is_empty() {
        return Ok(());
    }
    let caller = caller.ok_or_else(ApiError::authentication_required)?;

    let held = lookup
        .held_roles(&caller.user_id, &requirement.roles)
        .await
        .map_err(|e| ApiError::authorization_failed(e.message()))?;

    let granted = if requirement.require_all {
        requirement.roles.iter().all(|r| held.contains(r))
    } else {
        requirement.roles.iter().any(|r| held.contains(r))
    };

    if granted {
        Ok(())
    } else {
        tracing::warn!("User {} lacks roles {:?}", caller.user_id, requirement.roles);
        Err(ApiError::forbidden(requirement.denial()))
    }
}
