use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::data::Data;
use crate::error::ApiError;

/// A third-party login provider. `auth_data` is the provider's entry from the
/// user's `authData` map.
#[async_trait]
pub trait AuthAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate_auth_data(&self, auth_data: &Value, data: &Data) -> Result<(), ApiError>;

    /// Providers that bind tokens to a client app check it here.
    async fn validate_app_id(&self, _app_ids: &[String], _auth_data: &Value) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Providers by name, as they appear in `authData`.
#[derive(Clone, Default)]
pub struct AuthAdapters {
    adapters: HashMap<String, Arc<dyn AuthAdapter>>,
}

impl AuthAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn AuthAdapter>) {
        let name = adapter.name();
        if self.adapters.insert(name.to_string(), adapter).is_some() {
            tracing::warn!("Auth adapter '{}' registered twice; keeping the latest", name);
        } else {
            tracing::debug!("Registered auth adapter '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn AuthAdapter>, ApiError> {
        self.adapters
            .get(name)
            .ok_or_else(|| ApiError::bad_request(format!("Unsupported auth provider: {}", name)))
    }

    /// Run both provider checks for one `authData` entry.
    pub async fn validate(&self, provider: &str, auth_data: &Value, app_ids: &[String], data: &Data) -> Result<(), ApiError> {
        let adapter = self.get(provider)?;
        adapter.validate_app_id(app_ids, auth_data).await?;
        adapter.validate_auth_data(auth_data, data).await
    }
}
