//! Read and write access used by handlers. Every write is normalised against
//! the schema, passed through the trigger pipeline and applied as one batch.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::acl::Acl;
use crate::error::ApiError;
use crate::schema::{Schema, SchemaError};
use crate::store::{Document, ObjectStore, Query, StoredObject, WriteBatch, WriteOp};
use crate::triggers::{TriggerContext, TriggerPhase, TriggerPipeline};

#[derive(Clone)]
pub struct Data {
    store: Arc<dyn ObjectStore>,
    schema: Arc<Schema>,
    triggers: Arc<TriggerPipeline>,
}

impl Data {
    pub fn new(store: Arc<dyn ObjectStore>, schema: Arc<Schema>, triggers: Arc<TriggerPipeline>) -> Self {
        Self { store, schema, triggers }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub async fn get(&self, class_name: &str, id: &str) -> Result<Option<StoredObject>, ApiError> {
        Ok(self.store.get(class_name, id).await?)
    }

    /// Like `get`, but a missing object is a 404 carrying `not_found`.
    pub async fn fetch(&self, class_name: &str, id: &str, not_found: &str) -> Result<StoredObject, ApiError> {
        self.get(class_name, id)
            .await?
            .ok_or_else(|| ApiError::not_found(not_found))
    }

    pub async fn find(&self, query: &Query) -> Result<Vec<StoredObject>, ApiError> {
        Ok(self.store.find(query).await?)
    }

    pub async fn first(&self, query: Query) -> Result<Option<StoredObject>, ApiError> {
        Ok(self.store.find(&query.limit(1)).await?.into_iter().next())
    }

    pub async fn count(&self, query: &Query) -> Result<u64, ApiError> {
        Ok(self.store.count(query).await?)
    }

    pub async fn user_roles(&self, user_id: &str) -> Result<Vec<String>, ApiError> {
        Ok(self.store.user_roles(user_id).await?)
    }

    pub async fn role_by_name(&self, name: &str) -> Result<Option<StoredObject>, ApiError> {
        self.first(Query::new("_Role").equal_to("name", name)).await
    }

    pub async fn create(
        &self,
        class_name: &str,
        data: Document,
        acl: Option<Acl>,
        user_id: Option<&str>,
    ) -> Result<StoredObject, ApiError> {
        let mut batch = WriteBatch::new();
        batch.create_with_acl(class_name, data, acl);
        self.commit_one(batch, user_id).await
    }

    /// Write back a modified copy of a stored object.
    pub async fn save(&self, object: &StoredObject, user_id: Option<&str>) -> Result<StoredObject, ApiError> {
        let mut batch = WriteBatch::new();
        batch.update(object);
        self.commit_one(batch, user_id).await
    }

    pub async fn destroy(&self, object: &StoredObject, user_id: Option<&str>) -> Result<(), ApiError> {
        let mut batch = WriteBatch::new();
        batch.delete(object);
        self.commit(batch, user_id).await?;
        Ok(())
    }

    async fn commit_one(&self, batch: WriteBatch, user_id: Option<&str>) -> Result<StoredObject, ApiError> {
        self.commit(batch, user_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal_server_error("Write returned no object"))
    }

    /// Apply a batch atomically. Returns the created and updated objects in order.
    pub async fn commit(&self, batch: WriteBatch, user_id: Option<&str>) -> Result<Vec<StoredObject>, ApiError> {
        let pending: HashSet<(String, String)> = batch
            .ops()
            .iter()
            .filter_map(|op| match op {
                WriteOp::Create { class_name, id, .. } => Some((class_name.clone(), id.clone())),
                _ => None,
            })
            .collect();

        let mut ops = Vec::with_capacity(batch.len());
        let mut saved = Vec::new();
        let mut deleted = Vec::new();

        for op in batch.into_ops() {
            match op {
                WriteOp::Create {
                    class_name,
                    id,
                    data,
                    acl,
                } => {
                    let mut ctx = TriggerContext::new(&class_name, data);
                    ctx.object_id = Some(id.clone());
                    ctx.acl = acl;
                    ctx.user_id = user_id.map(str::to_string);
                    self.prepare(&mut ctx, &pending).await?;
                    ops.push(WriteOp::Create {
                        class_name,
                        id,
                        data: ctx.data.clone(),
                        acl: ctx.acl.clone(),
                    });
                    saved.push(ctx);
                }
                WriteOp::Update {
                    class_name,
                    id,
                    data,
                    acl,
                    expected_version,
                } => {
                    let mut ctx = TriggerContext::new(&class_name, data);
                    ctx.object_id = Some(id.clone());
                    ctx.acl = acl;
                    ctx.user_id = user_id.map(str::to_string);
                    ctx.original = self.store.get(&class_name, &id).await?;
                    self.prepare(&mut ctx, &pending).await?;
                    ops.push(WriteOp::Update {
                        class_name,
                        id,
                        data: ctx.data.clone(),
                        acl: ctx.acl.clone(),
                        expected_version,
                    });
                    saved.push(ctx);
                }
                WriteOp::Delete { ref class_name, ref id, .. } => {
                    if self.triggers.has_triggers(TriggerPhase::AfterDelete, class_name) {
                        if let Some(object) = self.store.get(class_name, id).await? {
                            let mut ctx = TriggerContext::for_object(&object);
                            ctx.user_id = user_id.map(str::to_string);
                            deleted.push(ctx);
                        }
                    }
                    ops.push(op);
                }
                WriteOp::AddRoleMember { .. } => ops.push(op),
            }
        }

        let written = self.store.apply(WriteBatch::from_ops(ops)).await?;
        debug!("Committed batch: {} saved, {} deleted", saved.len(), deleted.len());

        for ctx in &saved {
            self.triggers.after_save(ctx).await;
        }
        for ctx in &deleted {
            self.triggers.after_delete(ctx).await;
        }
        Ok(written)
    }

    /// Normalise, run before-save hooks, normalise what they produced and
    /// check every pointer resolves.
    async fn prepare(&self, ctx: &mut TriggerContext, pending: &HashSet<(String, String)>) -> Result<(), ApiError> {
        self.schema.normalize(&ctx.class_name, &mut ctx.data)?;
        self.triggers.before_save(ctx).await?;
        let pointers = self.schema.normalize(&ctx.class_name, &mut ctx.data)?;

        for pointer in pointers {
            let key = (pointer.class_name.clone(), pointer.object_id.clone());
            if pending.contains(&key) {
                continue;
            }
            if self.store.get(&pointer.class_name, &pointer.object_id).await?.is_none() {
                return Err(SchemaError::DanglingPointer {
                    field: pointer.field,
                    target: pointer.class_name,
                    object_id: pointer.object_id,
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{pointer, MemoryStore};
    use serde_json::json;

    fn data() -> Data {
        Data::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Schema::standard().unwrap()),
            Arc::new(TriggerPipeline::new()),
        )
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn rejects_dangling_pointers() {
        let data = data();
        let err = data
            .create("Wallet", doc(json!({"user_id": "missing", "balance": 0})), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn pointers_may_target_objects_in_the_same_batch() {
        let data = data();
        let mut batch = WriteBatch::new();
        let user_id = batch.create("_User", doc(json!({"username": "p"})));
        batch.create("Wallet", doc(json!({"user_id": pointer("_User", &user_id), "balance": 5})));
        let written = data.commit(batch, None).await.unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[1].pointer_id("user_id"), Some(user_id.as_str()));
    }

    #[tokio::test]
    async fn save_and_destroy_round_trip() {
        let data = data();
        let mut level = data
            .create("Level", doc(json!({"name": "One", "order": 1})), None, None)
            .await
            .unwrap();
        level.set("description", "first");
        let saved = data.save(&level, None).await.unwrap();
        assert_eq!(saved.version, 2);

        data.destroy(&saved, None).await.unwrap();
        let err = data.fetch("Level", &saved.id, "Level not found").await.unwrap_err();
        assert_eq!(err.message(), "Level not found");
    }

    #[tokio::test]
    async fn unknown_class_is_404() {
        let err = data().create("Nope", Document::new(), None, None).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
