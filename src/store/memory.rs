use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{ObjectStore, Query, StoreError, StoredObject, WriteBatch, WriteOp};

type Key = (String, String);

#[derive(Default)]
struct Inner {
    objects: HashMap<Key, (u64, StoredObject)>,
    next_seq: u64,
    role_members: HashMap<String, HashSet<String>>,
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(class_name: &str, id: &str) -> Key {
    (class_name.to_string(), id.to_string())
}

impl Inner {
    /// Check every precondition of the batch before anything is written.
    fn check(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        // Version each touched object will have once earlier ops in the batch run.
        let mut staged: HashMap<Key, Option<i64>> = HashMap::new();

        let current = |staged: &HashMap<Key, Option<i64>>, k: &Key| match staged.get(k) {
            Some(version) => *version,
            None => self.objects.get(k).map(|(_, o)| o.version),
        };

        for op in batch.ops() {
            match op {
                WriteOp::Create { class_name, id, .. } => {
                    let k = key(class_name, id);
                    if current(&staged, &k).is_some() {
                        return Err(StoreError::Duplicate {
                            class_name: class_name.clone(),
                            id: id.clone(),
                        });
                    }
                    staged.insert(k, Some(1));
                }
                WriteOp::Update {
                    class_name,
                    id,
                    expected_version,
                    ..
                } => {
                    let k = key(class_name, id);
                    match current(&staged, &k) {
                        None => {
                            return Err(StoreError::NotFound {
                                class_name: class_name.clone(),
                                id: id.clone(),
                            })
                        }
                        Some(v) if expected_version.is_some_and(|expected| expected != v) => {
                            return Err(StoreError::VersionConflict {
                                class_name: class_name.clone(),
                                id: id.clone(),
                            })
                        }
                        Some(v) => {
                            staged.insert(k, Some(v + 1));
                        }
                    }
                }
                WriteOp::Delete {
                    class_name,
                    id,
                    expected_version,
                } => {
                    let k = key(class_name, id);
                    match current(&staged, &k) {
                        None => {
                            return Err(StoreError::NotFound {
                                class_name: class_name.clone(),
                                id: id.clone(),
                            })
                        }
                        Some(v) if v != *expected_version => {
                            return Err(StoreError::VersionConflict {
                                class_name: class_name.clone(),
                                id: id.clone(),
                            })
                        }
                        Some(_) => {
                            staged.insert(k, None);
                        }
                    }
                }
                WriteOp::AddRoleMember { role_id, .. } => {
                    if current(&staged, &key("_Role", role_id)).is_none() {
                        return Err(StoreError::NotFound {
                            class_name: "_Role".to_string(),
                            id: role_id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, class_name: &str, id: &str) -> Result<Option<StoredObject>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.objects.get(&key(class_name, id)).map(|(_, o)| o.clone()))
    }

    async fn find(&self, query: &Query) -> Result<Vec<StoredObject>, StoreError> {
        query.validate()?;
        let inner = self.inner.read().await;

        let mut matched: Vec<(u64, StoredObject)> = Vec::new();
        for (seq, object) in inner.objects.values() {
            if query.matches(object)? {
                matched.push((*seq, object.clone()));
            }
        }
        matched.sort_by_key(|(seq, _)| *seq);

        let mut objects: Vec<StoredObject> = matched.into_iter().map(|(_, o)| o).collect();
        objects.sort_by(|a, b| query.compare(a, b));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(objects.into_iter().skip(query.skip).take(limit).collect())
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        query.validate()?;
        let inner = self.inner.read().await;
        let mut count = 0u64;
        for (_, object) in inner.objects.values() {
            if query.matches(object)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<StoredObject>, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check(&batch)?;

        let now = Utc::now();
        let mut written = Vec::new();

        for op in batch.into_ops() {
            match op {
                WriteOp::Create {
                    class_name,
                    id,
                    data,
                    acl,
                } => {
                    inner.next_seq += 1;
                    let seq = inner.next_seq;
                    let object = StoredObject {
                        class_name: class_name.clone(),
                        id: id.clone(),
                        data,
                        acl,
                        version: 1,
                        created_at: now,
                        updated_at: now,
                    };
                    inner.objects.insert((class_name, id), (seq, object.clone()));
                    written.push(object);
                }
                WriteOp::Update {
                    class_name,
                    id,
                    data,
                    acl,
                    ..
                } => {
                    if let Some((_, object)) = inner.objects.get_mut(&(class_name, id)) {
                        object.data = data;
                        object.acl = acl;
                        object.version += 1;
                        object.updated_at = now;
                        written.push(object.clone());
                    }
                }
                WriteOp::Delete { class_name, id, .. } => {
                    match class_name.as_str() {
                        "_Role" => {
                            inner.role_members.remove(&id);
                        }
                        "_User" => {
                            for members in inner.role_members.values_mut() {
                                members.remove(&id);
                            }
                        }
                        _ => {}
                    }
                    inner.objects.remove(&(class_name, id));
                }
                WriteOp::AddRoleMember { role_id, user_id } => {
                    inner.role_members.entry(role_id).or_default().insert(user_id);
                }
            }
        }

        Ok(written)
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut roles: Vec<String> = inner
            .role_members
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .filter_map(|(role_id, _)| inner.objects.get(&key("_Role", role_id)))
            .filter_map(|(_, role)| role.str_field("name").map(str::to_string))
            .collect();
        roles.sort();
        Ok(roles)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> super::super::Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn create_then_update_bumps_version() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        let id = batch.create("Wallet", doc(json!({"balance": 10})));
        store.apply(batch).await.unwrap();

        let mut wallet = store.get("Wallet", &id).await.unwrap().unwrap();
        assert_eq!(wallet.version, 1);
        wallet.set("balance", 20);

        let mut batch = WriteBatch::new();
        batch.update(&wallet);
        let written = store.apply(batch).await.unwrap();
        assert_eq!(written[0].version, 2);
        assert_eq!(written[0].f64_field("balance"), Some(20.0));
    }

    #[tokio::test]
    async fn stale_update_aborts_whole_batch() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        let id = batch.create("Wallet", doc(json!({"balance": 10})));
        store.apply(batch).await.unwrap();

        let stale = store.get("Wallet", &id).await.unwrap().unwrap();
        let mut batch = WriteBatch::new();
        batch.update(&stale);
        store.apply(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        let tx_id = batch.create("WalletTransaction", doc(json!({"amount": 5})));
        batch.update(&stale);
        let result = store.apply(batch).await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        assert!(store.get("WalletTransaction", &tx_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_ignores_stale_versions() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        let id = batch.create("ChatGroup", doc(json!({"last_message": "a"})));
        store.apply(batch).await.unwrap();

        let mut first = store.get("ChatGroup", &id).await.unwrap().unwrap();
        let mut second = first.clone();
        first.set("last_message", "b");
        second.set("last_message", "c");

        let mut batch = WriteBatch::new();
        batch.overwrite(&first);
        store.apply(batch).await.unwrap();
        let mut batch = WriteBatch::new();
        batch.overwrite(&second);
        let written = store.apply(batch).await.unwrap();

        assert_eq!(written[0].version, 3);
        assert_eq!(written[0].str_field("last_message"), Some("c"));
    }

    #[tokio::test]
    async fn role_membership_resolves_names() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        let role_id = batch.create("_Role", doc(json!({"name": "Admin"})));
        let user_id = batch.create("_User", doc(json!({"username": "u"})));
        batch.add_role_member(&role_id, &user_id);
        store.apply(batch).await.unwrap();

        assert_eq!(store.user_roles(&user_id).await.unwrap(), vec!["Admin".to_string()]);
        assert!(store.user_roles("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_orders_and_pages() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        for order in [3, 1, 2] {
            batch.create("LevelGame", doc(json!({"order": order})));
        }
        store.apply(batch).await.unwrap();

        let query = Query::new("LevelGame").ascending("order").skip(1).limit(1);
        let found = store.find(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].i64_field("order"), Some(2));
        assert_eq!(store.count(&Query::new("LevelGame")).await.unwrap(), 3);
    }
}
