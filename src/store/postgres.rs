use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Postgres, Row, Transaction,
};
use std::time::Duration;
use tracing::info;

use super::{Document, ObjectStore, Query, StoreError, StoredObject, WriteBatch, WriteOp};
use crate::acl::Acl;
use crate::config::DatabaseConfig;

const COLUMNS: &str = "class_name, object_id, data, acl, version, created_at, updated_at";

const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS objects (
        seq BIGSERIAL,
        class_name TEXT NOT NULL,
        object_id TEXT NOT NULL,
        data JSONB NOT NULL DEFAULT '{}'::jsonb,
        acl JSONB,
        version BIGINT NOT NULL DEFAULT 1,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (class_name, object_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS objects_data_gin ON objects USING GIN (data)",
    "CREATE INDEX IF NOT EXISTS objects_class_seq ON objects (class_name, seq)",
    r#"CREATE TABLE IF NOT EXISTS role_members (
        role_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        PRIMARY KEY (role_id, user_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS role_members_user ON role_members (user_id)",
];

/// Postgres-backed store: one JSONB row per object.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;
        info!("Created database pool (max {} connections)", config.max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Object store schema is up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database pool");
    }
}

fn select_sql(query: &Query) -> Result<(String, Vec<Value>), StoreError> {
    let (predicate, params) = query.sql_where(2)?;
    let sql = format!(
        "SELECT {} FROM objects WHERE class_name = $1 AND {} {} {}",
        COLUMNS,
        predicate,
        query.sql_order()?,
        query.sql_paging()
    );
    Ok((sql.trim_end().to_string(), params))
}

fn count_sql(query: &Query) -> Result<(String, Vec<Value>), StoreError> {
    let (predicate, params) = query.sql_where(2)?;
    Ok((
        format!("SELECT COUNT(*) FROM objects WHERE class_name = $1 AND {}", predicate),
        params,
    ))
}

fn row_to_object(row: &PgRow) -> Result<StoredObject, StoreError> {
    let data: Json<Document> = row.try_get("data")?;
    let acl: Option<Json<Acl>> = row.try_get("acl")?;
    Ok(StoredObject {
        class_name: row.try_get("class_name")?,
        id: row.try_get("object_id")?,
        data: data.0,
        acl: acl.map(|a| a.0),
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Distinguish a missing row from a stale version after a guarded write hit nothing.
async fn missing_or_stale(
    tx: &mut Transaction<'_, Postgres>,
    class_name: &str,
    id: &str,
) -> Result<StoreError, StoreError> {
    let exists = sqlx::query("SELECT 1 FROM objects WHERE class_name = $1 AND object_id = $2")
        .bind(class_name)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .is_some();
    let class_name = class_name.to_string();
    let id = id.to_string();
    Ok(if exists {
        StoreError::VersionConflict { class_name, id }
    } else {
        StoreError::NotFound { class_name, id }
    })
}

#[async_trait]
impl ObjectStore for PgStore {
    async fn get(&self, class_name: &str, id: &str) -> Result<Option<StoredObject>, StoreError> {
        let sql = format!("SELECT {} FROM objects WHERE class_name = $1 AND object_id = $2", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(class_name)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_object).transpose()
    }

    async fn find(&self, query: &Query) -> Result<Vec<StoredObject>, StoreError> {
        let (sql, params) = select_sql(query)?;
        let mut q = sqlx::query(&sql).bind(&query.class_name);
        for param in params {
            q = q.bind(Json(param));
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_object).collect()
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let (sql, params) = count_sql(query)?;
        let mut q = sqlx::query(&sql).bind(&query.class_name);
        for param in params {
            q = q.bind(Json(param));
        }
        let count: i64 = q.fetch_one(&self.pool).await?.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<StoredObject>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::new();

        for op in batch.into_ops() {
            match op {
                WriteOp::Create {
                    class_name,
                    id,
                    data,
                    acl,
                } => {
                    let sql = format!(
                        "INSERT INTO objects (class_name, object_id, data, acl, version) \
                         VALUES ($1, $2, $3, $4, 1) RETURNING {}",
                        COLUMNS
                    );
                    let row = sqlx::query(&sql)
                        .bind(&class_name)
                        .bind(&id)
                        .bind(Json(&data))
                        .bind(acl.as_ref().map(Json))
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|e| {
                            if is_unique_violation(&e) {
                                StoreError::Duplicate {
                                    class_name: class_name.clone(),
                                    id: id.clone(),
                                }
                            } else {
                                StoreError::Sqlx(e)
                            }
                        })?;
                    written.push(row_to_object(&row)?);
                }
                WriteOp::Update {
                    class_name,
                    id,
                    data,
                    acl,
                    expected_version,
                } => {
                    let sql = format!(
                        "UPDATE objects SET data = $3, acl = $4, version = version + 1, updated_at = now() \
                         WHERE class_name = $1 AND object_id = $2 AND ($5::bigint IS NULL OR version = $5) RETURNING {}",
                        COLUMNS
                    );
                    let row = sqlx::query(&sql)
                        .bind(&class_name)
                        .bind(&id)
                        .bind(Json(&data))
                        .bind(acl.as_ref().map(Json))
                        .bind(expected_version)
                        .fetch_optional(&mut *tx)
                        .await?;
                    match row {
                        Some(row) => written.push(row_to_object(&row)?),
                        None => return Err(missing_or_stale(&mut tx, &class_name, &id).await?),
                    }
                }
                WriteOp::Delete {
                    class_name,
                    id,
                    expected_version,
                } => {
                    let result = sqlx::query(
                        "DELETE FROM objects WHERE class_name = $1 AND object_id = $2 AND version = $3",
                    )
                    .bind(&class_name)
                    .bind(&id)
                    .bind(expected_version)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(missing_or_stale(&mut tx, &class_name, &id).await?);
                    }
                    let cleanup = match class_name.as_str() {
                        "_Role" => Some("DELETE FROM role_members WHERE role_id = $1"),
                        "_User" => Some("DELETE FROM role_members WHERE user_id = $1"),
                        _ => None,
                    };
                    if let Some(cleanup) = cleanup {
                        sqlx::query(cleanup).bind(&id).execute(&mut *tx).await?;
                    }
                }
                WriteOp::AddRoleMember { role_id, user_id } => {
                    let role = sqlx::query("SELECT 1 FROM objects WHERE class_name = '_Role' AND object_id = $1")
                        .bind(&role_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                    if role.is_none() {
                        return Err(StoreError::NotFound {
                            class_name: "_Role".to_string(),
                            id: role_id,
                        });
                    }
                    sqlx::query("INSERT INTO role_members (role_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                        .bind(&role_id)
                        .bind(&user_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT o.data->>'name' AS name FROM role_members m \
             JOIN objects o ON o.class_name = '_Role' AND o.object_id = m.role_id \
             WHERE m.user_id = $1 ORDER BY 1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(name) = row.try_get::<Option<String>, _>("name")? {
                roles.push(name);
            }
        }
        Ok(roles)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
