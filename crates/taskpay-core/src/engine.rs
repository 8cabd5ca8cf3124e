use crate::auth::{Authorizer, Role};
use crate::cache::{CachePort, NoopCache, TtlReadCache};
use crate::error::LedgerError;
use crate::store::{DocumentStorageConfig, DocumentStore, InMemoryDocumentStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wallet ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerEngineConfig {
    pub storage: DocumentStorageConfig,
    /// `0` disables the read cache.
    pub cache_ttl_secs: u64,
    pub cas_max_attempts: u32,
}

impl Default for LedgerEngineConfig {
    fn default() -> Self {
        Self {
            storage: DocumentStorageConfig::Memory,
            cache_ttl_secs: 30,
            cas_max_attempts: crate::store::memory::DEFAULT_CAS_MAX_ATTEMPTS,
        }
    }
}

/// Wallet ledger engine.
///
/// Every entry point takes the acting user id and authorizes it before any
/// read or mutation. Multi-document operations mutate the primary document
/// first and compensate it when the secondary leg fails.
pub struct LedgerEngine {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) cache: Arc<dyn CachePort>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn CachePort>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            store,
            cache,
            authorizer,
        }
    }

    /// Build the store and cache described by `config`.
    pub async fn bootstrap(
        config: LedgerEngineConfig,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self, LedgerError> {
        let store: Arc<dyn DocumentStore> = match &config.storage {
            DocumentStorageConfig::Memory => Arc::new(InMemoryDocumentStore::with_max_attempts(
                config.cas_max_attempts,
            )),
            #[cfg(feature = "postgres")]
            DocumentStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = crate::store::PostgresDocumentStore::connect(
                    database_url,
                    *max_connections,
                    config.cas_max_attempts,
                )
                .await?;
                store.ensure_schema().await?;
                Arc::new(store)
            }
            #[cfg(not(feature = "postgres"))]
            DocumentStorageConfig::Postgres { .. } => {
                return Err(LedgerError::InvalidInput(
                    "postgres storage requested but taskpay-core was built without the `postgres` feature"
                        .to_string(),
                ));
            }
        };

        let cache: Arc<dyn CachePort> = if config.cache_ttl_secs == 0 {
            Arc::new(NoopCache)
        } else {
            Arc::new(TtlReadCache::new(Duration::from_secs(config.cache_ttl_secs)))
        };

        info!(
            storage = store.backend_label(),
            cache_ttl_secs = config.cache_ttl_secs,
            "ledger engine ready"
        );
        Ok(Self::new(store, cache, authorizer))
    }

    pub fn storage_backend(&self) -> &'static str {
        self.store.backend_label()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn CachePort> {
        &self.cache
    }

    pub(crate) async fn require(
        &self,
        actor_id: &str,
        owner_id: &str,
        role: Option<Role>,
        resource: &str,
    ) -> Result<(), LedgerError> {
        if self.authorizer.authorize(actor_id, owner_id, role).await {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(actor_id, resource))
        }
    }

    pub(crate) async fn invalidate(&self, keys: &[String]) {
        for key in keys {
            self.cache.invalidate(key).await;
        }
    }
}

pub(crate) fn require_amount(amount: crate::types::Amount) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidInput(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn require_id(name: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() || value.contains('/') {
        return Err(LedgerError::InvalidInput(format!(
            "{name} must be a non-empty id without '/'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RoleAuthorizer;

    #[tokio::test]
    async fn bootstrap_defaults_to_memory() {
        let engine = LedgerEngine::bootstrap(
            LedgerEngineConfig::default(),
            Arc::new(RoleAuthorizer::new()),
        )
        .await
        .unwrap();
        assert_eq!(engine.storage_backend(), "memory");
    }

    #[tokio::test]
    async fn require_rejects_strangers() {
        let engine = LedgerEngine::bootstrap(
            LedgerEngineConfig::default(),
            Arc::new(RoleAuthorizer::new()),
        )
        .await
        .unwrap();
        let err = engine
            .require("u2", "u1", None, "wallets/u1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
    }

    #[test]
    fn ids_and_amounts_are_validated() {
        assert!(require_amount(0).is_err());
        assert!(require_amount(1).is_ok());
        assert!(require_id("user id", "").is_err());
        assert!(require_id("user id", "a/b").is_err());
        assert!(require_id("user id", "u1").is_ok());
    }
}
