//! Document store port.
//!
//! The ledger never relies on multi-document transactions. It needs four
//! primitives: point read, merge write, append-with-generated-id, and an
//! optimistic single-path compare-and-swap that re-runs the caller's update
//! function against the latest value until it commits or aborts.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::paths::DocPath;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use memory::{InMemoryDocumentStore, StoreFault};
#[cfg(feature = "postgres")]
pub use postgres::PostgresDocumentStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level failures unrelated to business rules.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("serialization error at '{path}': {message}")]
    Serialization { path: String, message: String },
}

impl StoreError {
    pub(crate) fn serialization(path: &DocPath, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Decision returned by a compare-and-swap update function.
#[derive(Debug, Clone, PartialEq)]
pub enum CasDecision {
    Commit(Value),
    Abort,
}

/// Result of a compare-and-swap attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CasOutcome {
    pub committed: bool,
    /// Committed value, or the last value the update function saw.
    pub value: Option<Value>,
}

impl CasOutcome {
    pub fn committed(value: Value) -> Self {
        Self {
            committed: true,
            value: Some(value),
        }
    }

    pub fn aborted(last_seen: Option<Value>) -> Self {
        Self {
            committed: false,
            value: last_seen,
        }
    }
}

/// Update function handed to [`DocumentStore::compare_and_swap`]. May run more than once.
pub type CasUpdate<'a> = dyn FnMut(Option<&Value>) -> CasDecision + Send + 'a;

/// Key-path document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    async fn read(&self, path: &DocPath) -> StoreResult<Option<Value>>;

    /// Shallow merge of top-level object fields; creates the document when absent.
    async fn write(&self, path: &DocPath, partial: Value) -> StoreResult<()>;

    /// Store `value` under a freshly generated child id of `parent` and return the id.
    async fn append_child(&self, parent: &DocPath, value: Value) -> StoreResult<String>;

    /// Optimistic read-modify-write of one path. Conflicting writers cause the
    /// update function to be re-invoked with the newer value.
    async fn compare_and_swap(
        &self,
        path: &DocPath,
        update: &mut CasUpdate<'_>,
    ) -> StoreResult<CasOutcome>;
}

/// Document storage backend configuration.
#[derive(Debug, Clone, Default)]
pub enum DocumentStorageConfig {
    /// Keep all documents in process memory only.
    #[default]
    Memory,
    /// Persist documents in PostgreSQL (requires the `postgres` feature).
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl DocumentStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Read and decode one document.
pub async fn read_doc<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> StoreResult<Option<T>> {
    store
        .read(path)
        .await?
        .map(|value| serde_json::from_value(value).map_err(|e| StoreError::serialization(path, e)))
        .transpose()
}

/// Encode and append one document under `parent`.
pub async fn append_doc<T: Serialize>(
    store: &dyn DocumentStore,
    parent: &DocPath,
    doc: &T,
) -> StoreResult<String> {
    let value = serde_json::to_value(doc).map_err(|e| StoreError::serialization(parent, e))?;
    store.append_child(parent, value).await
}

/// Typed compare-and-swap. `apply` returns `None` to abort.
///
/// Returns the committed document, or `None` when `apply` aborted or the
/// store declined to commit.
pub async fn transact<T, F>(
    store: &dyn DocumentStore,
    path: &DocPath,
    mut apply: F,
) -> StoreResult<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> Option<T> + Send,
{
    let mut codec_error: Option<StoreError> = None;
    let outcome = store
        .compare_and_swap(path, &mut |current: Option<&Value>| {
            let decoded = match current
                .map(|value| serde_json::from_value::<T>(value.clone()))
                .transpose()
            {
                Ok(decoded) => decoded,
                Err(e) => {
                    codec_error = Some(StoreError::serialization(path, e));
                    return CasDecision::Abort;
                }
            };
            match apply(decoded) {
                Some(next) => match serde_json::to_value(&next) {
                    Ok(value) => CasDecision::Commit(value),
                    Err(e) => {
                        codec_error = Some(StoreError::serialization(path, e));
                        CasDecision::Abort
                    }
                },
                None => CasDecision::Abort,
            }
        })
        .await?;

    if let Some(err) = codec_error {
        return Err(err);
    }
    if !outcome.committed {
        return Ok(None);
    }
    outcome
        .value
        .map(|value| serde_json::from_value(value).map_err(|e| StoreError::serialization(path, e)))
        .transpose()
}
