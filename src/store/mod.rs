pub mod memory;
pub mod postgres;
pub mod query;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::acl::Acl;
use crate::config::{AppConfig, StoreBackend};

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use query::{Query, SortDirection};

/// Field map of a stored object, without the system columns.
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {class_name}/{id}")]
    NotFound { class_name: String, id: String },

    #[error("Object {class_name}/{id} was modified concurrently")]
    VersionConflict { class_name: String, id: String },

    #[error("Object {class_name}/{id} already exists")]
    Duplicate { class_name: String, id: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub class_name: String,
    pub id: String,
    pub data: Document,
    pub acl: Option<Acl>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.data.insert(field.to_string(), value.into());
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn i64_field(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn bool_field(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// Object id held by a pointer field.
    pub fn pointer_id(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(pointer_target_id)
    }

    /// Pointer value referencing this object.
    pub fn pointer(&self) -> Value {
        pointer(&self.class_name, &self.id)
    }

    /// Client representation: fields plus system columns, internal `_` fields removed.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("objectId".to_string(), Value::String(self.id.clone()));
        out.insert("className".to_string(), Value::String(self.class_name.clone()));
        out.insert("createdAt".to_string(), Value::String(iso_timestamp(&self.created_at)));
        out.insert("updatedAt".to_string(), Value::String(iso_timestamp(&self.updated_at)));
        for (key, value) in &self.data {
            if key.starts_with('_') {
                continue;
            }
            out.insert(key.clone(), value.clone());
        }
        if let Some(acl) = &self.acl {
            if let Ok(acl) = serde_json::to_value(acl) {
                out.insert("ACL".to_string(), acl);
            }
        }
        Value::Object(out)
    }
}

pub fn pointer(class_name: &str, id: &str) -> Value {
    json!({"__type": "Pointer", "className": class_name, "objectId": id})
}

pub fn pointer_target_id(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.get("__type").and_then(Value::as_str) == Some("Pointer") => {
            map.get("objectId").and_then(Value::as_str)
        }
        _ => None,
    }
}

pub fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn date_value(at: &DateTime<Utc>) -> Value {
    json!({"__type": "Date", "iso": iso_timestamp(at)})
}

pub fn file_value(name: &str) -> Value {
    json!({"__type": "File", "name": name})
}

/// Name of the file referenced by a File value.
pub fn file_name(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.get("__type").and_then(Value::as_str) == Some("File") => {
            map.get("name").and_then(Value::as_str)
        }
        _ => None,
    }
}

/// Ten character alphanumeric id, the format clients already store.
pub fn new_object_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create {
        class_name: String,
        id: String,
        data: Document,
        acl: Option<Acl>,
    },
    /// `expected_version: None` writes whatever version is current.
    Update {
        class_name: String,
        id: String,
        data: Document,
        acl: Option<Acl>,
        expected_version: Option<i64>,
    },
    Delete {
        class_name: String,
        id: String,
        expected_version: i64,
    },
    AddRoleMember {
        role_id: String,
        user_id: String,
    },
}

/// Writes applied all-or-nothing. Updates and deletes carry the version they
/// were read at; a mismatch aborts the whole batch. Overwrites skip the check.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ops(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }

    /// Queue a new object and return the id it will be stored under.
    pub fn create(&mut self, class_name: &str, data: Document) -> String {
        self.create_with_acl(class_name, data, None)
    }

    pub fn create_with_acl(&mut self, class_name: &str, data: Document, acl: Option<Acl>) -> String {
        let id = new_object_id();
        self.insert(class_name, &id, data, acl);
        id
    }

    /// Queue a new object under an id the caller already allocated.
    pub fn insert(&mut self, class_name: &str, id: &str, data: Document, acl: Option<Acl>) {
        self.ops.push(WriteOp::Create {
            class_name: class_name.to_string(),
            id: id.to_string(),
            data,
            acl,
        });
    }

    pub fn update(&mut self, object: &StoredObject) {
        self.ops.push(WriteOp::Update {
            class_name: object.class_name.clone(),
            id: object.id.clone(),
            data: object.data.clone(),
            acl: object.acl.clone(),
            expected_version: Some(object.version),
        });
    }

    /// Like `update`, but the last writer wins. For fields such as a chat
    /// group's `last_message` that concurrent requests all set.
    pub fn overwrite(&mut self, object: &StoredObject) {
        self.ops.push(WriteOp::Update {
            class_name: object.class_name.clone(),
            id: object.id.clone(),
            data: object.data.clone(),
            acl: object.acl.clone(),
            expected_version: None,
        });
    }

    pub fn delete(&mut self, object: &StoredObject) {
        self.ops.push(WriteOp::Delete {
            class_name: object.class_name.clone(),
            id: object.id.clone(),
            expected_version: object.version,
        });
    }

    pub fn add_role_member(&mut self, role_id: &str, user_id: &str) {
        self.ops.push(WriteOp::AddRoleMember {
            role_id: role_id.to_string(),
            user_id: user_id.to_string(),
        });
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Persistence seam. Implementations must apply a batch atomically.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, class_name: &str, id: &str) -> Result<Option<StoredObject>, StoreError>;

    async fn find(&self, query: &Query) -> Result<Vec<StoredObject>, StoreError>;

    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    /// Returns the created and updated objects in batch order.
    async fn apply(&self, batch: WriteBatch) -> Result<Vec<StoredObject>, StoreError>;

    /// Names of every `_Role` the user is a member of.
    async fn user_roles(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Open the store selected by configuration.
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config.database.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not configured".to_string()))?;
            let store = PgStore::connect(url, &config.database).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_ten_alphanumerics() {
        let id = new_object_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn to_json_hides_internal_fields() {
        let now = Utc::now();
        let mut data = Document::new();
        data.insert("username".to_string(), json!("super"));
        data.insert("_hashed_password".to_string(), json!("secret"));
        let object = StoredObject {
            class_name: "_User".to_string(),
            id: "abc".to_string(),
            data,
            acl: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let out = object.to_json();
        assert_eq!(out["objectId"], "abc");
        assert_eq!(out["username"], "super");
        assert!(out.get("_hashed_password").is_none());
    }

    #[test]
    fn reads_pointer_ids() {
        let value = pointer("Wallet", "w1");
        assert_eq!(pointer_target_id(&value), Some("w1"));
        assert_eq!(pointer_target_id(&json!("w1")), None);
    }
}
