//! PostgreSQL document store.
//!
//! Every document is one JSONB row keyed by its full path. A monotonically
//! increasing `version` column turns compare-and-swap into a conditional
//! `UPDATE ... WHERE version = $n`.

use super::{CasDecision, CasOutcome, CasUpdate, DocumentStore, StoreError, StoreResult};
use crate::paths::DocPath;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
    max_attempts: u32,
}

impl PostgresDocumentStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        max_attempts: u32,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("postgres connect failed: {e}")))?;

        Ok(Self {
            pool,
            max_attempts: max_attempts.max(1),
        })
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS taskpay_documents (
                path TEXT PRIMARY KEY,
                body JSONB NOT NULL,
                version BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("postgres schema create failed: {e}")))?;

        Ok(())
    }

    async fn load(&self, path: &DocPath) -> StoreResult<Option<(Value, i64)>> {
        let row = sqlx::query("SELECT body, version FROM taskpay_documents WHERE path = $1")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("postgres read failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: Value = row
            .try_get("body")
            .map_err(|e| StoreError::Backend(format!("postgres decode body failed: {e}")))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::Backend(format!("postgres decode version failed: {e}")))?;
        Ok(Some((body, version)))
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn read(&self, path: &DocPath) -> StoreResult<Option<Value>> {
        Ok(self.load(path).await?.map(|(body, _)| body))
    }

    async fn write(&self, path: &DocPath, partial: Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO taskpay_documents (path, body, version, updated_at)
            VALUES ($1, $2, 1, NOW())
            ON CONFLICT (path) DO UPDATE SET
                body = CASE
                    WHEN jsonb_typeof(taskpay_documents.body) = 'object'
                     AND jsonb_typeof(EXCLUDED.body) = 'object'
                    THEN taskpay_documents.body || EXCLUDED.body
                    ELSE EXCLUDED.body
                END,
                version = taskpay_documents.version + 1,
                updated_at = NOW()
            "#,
        )
        .bind(path.as_str())
        .bind(&partial)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("postgres write failed: {e}")))?;

        Ok(())
    }

    async fn append_child(&self, parent: &DocPath, value: Value) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let path = parent.child(&id);

        sqlx::query(
            "INSERT INTO taskpay_documents (path, body, version, updated_at) VALUES ($1, $2, 1, NOW())",
        )
        .bind(path.as_str())
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("postgres append failed: {e}")))?;

        Ok(id)
    }

    async fn compare_and_swap(
        &self,
        path: &DocPath,
        update: &mut CasUpdate<'_>,
    ) -> StoreResult<CasOutcome> {
        for attempt in 1..=self.max_attempts {
            let current = self.load(path).await?;
            let seen_version = current.as_ref().map(|(_, version)| *version);
            let seen_value = current.map(|(body, _)| body);

            let next = match update(seen_value.as_ref()) {
                CasDecision::Abort => return Ok(CasOutcome::aborted(seen_value)),
                CasDecision::Commit(next) => next,
            };

            let result = match seen_version {
                Some(version) => sqlx::query(
                    r#"
                    UPDATE taskpay_documents
                    SET body = $2, version = version + 1, updated_at = NOW()
                    WHERE path = $1 AND version = $3
                    "#,
                )
                .bind(path.as_str())
                .bind(&next)
                .bind(version)
                .execute(&self.pool)
                .await,
                None => sqlx::query(
                    r#"
                    INSERT INTO taskpay_documents (path, body, version, updated_at)
                    VALUES ($1, $2, 1, NOW())
                    ON CONFLICT (path) DO NOTHING
                    "#,
                )
                .bind(path.as_str())
                .bind(&next)
                .execute(&self.pool)
                .await,
            }
            .map_err(|e| StoreError::Backend(format!("postgres compare-and-swap failed: {e}")))?;

            if result.rows_affected() == 1 {
                return Ok(CasOutcome::committed(next));
            }
            debug!(path = %path, attempt, "compare-and-swap conflict, retrying");
        }

        debug!(path = %path, attempts = self.max_attempts, "compare-and-swap gave up");
        Ok(CasOutcome::aborted(None))
    }
}
