//! Postgres-backed store.
//!
//! Documents live in one `documents` table (see `db/sql/schema.sql`) keyed
//! by `(kind, key)` with a `version` column. Read-modify-write is an
//! optimistic compare-and-set loop: read the document and its version, apply
//! the closure, then either insert (first write wins through `ON CONFLICT DO
//! NOTHING`) or update guarded by the version we read. Losing the race
//! reloads and reapplies, up to a small bound.

use crate::store::{AtomicStore, Mutation, RecordKind, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, Connection, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, Instrument};

const MAX_CAS_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the service's standard pool sizing.
    ///
    /// # Errors
    /// Returns a backend error when the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .map_err(backend)?;

        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load(&self, kind: RecordKind, key: &str) -> Result<Option<(Value, i64)>, StoreError> {
        let query = "SELECT doc, version FROM documents WHERE kind = $1 AND key = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(kind.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(backend)?;

        row.map(|row| {
            let doc: Value = row.try_get("doc").map_err(backend)?;
            let version: i64 = row.try_get("version").map_err(backend)?;
            Ok((doc, version))
        })
        .transpose()
    }

    async fn insert_new(&self, kind: RecordKind, key: &str, doc: &Value) -> Result<bool, StoreError> {
        let query = "INSERT INTO documents (kind, key, doc) VALUES ($1, $2, $3) \
                     ON CONFLICT (kind, key) DO NOTHING";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(kind.as_str())
            .bind(key)
            .bind(doc)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn replace_at(
        &self,
        kind: RecordKind,
        key: &str,
        doc: &Value,
        seen_version: i64,
    ) -> Result<bool, StoreError> {
        let query = "UPDATE documents SET doc = $3, version = version + 1, updated_at = now() \
                     WHERE kind = $1 AND key = $2 AND version = $4";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(kind.as_str())
            .bind(key)
            .bind(doc)
            .bind(seen_version)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AtomicStore for PgStore {
    async fn read_modify_write<T, F>(
        &self,
        kind: RecordKind,
        key: &str,
        apply: F,
    ) -> Result<T, StoreError>
    where
        T: Send,
        F: Fn(Option<&Value>) -> Result<Mutation<T>, StoreError> + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.load(kind, key).await?;
            let seen_version = current.as_ref().map(|(_, version)| *version);
            let doc = current.as_ref().map(|(doc, _)| doc);

            match apply(doc)? {
                Mutation::Keep { output } => return Ok(output),
                Mutation::Write { doc: next, output } => {
                    let landed = match seen_version {
                        None => self.insert_new(kind, key, &next).await?,
                        Some(version) => self.replace_at(kind, key, &next, version).await?,
                    };
                    if landed {
                        return Ok(output);
                    }
                    // Lost the race; reload and reapply.
                }
            }
        }

        Err(StoreError::ConflictExhausted(MAX_CAS_ATTEMPTS))
    }

    async fn read(&self, kind: RecordKind, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load(kind, key).await?.map(|(doc, _)| doc))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .map_err(backend)?;

        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await.map_err(backend)
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
