//! Wallet mutations.
//!
//! No balance field is ever written by plain overwrite: every change goes
//! through [`LedgerEngine::cas_wallet`], which reads the current wallet
//! (all-zero when absent), lets the caller compute a partial update, and
//! commits the merge with the store's compare-and-swap.

use crate::auth::Role;
use crate::engine::{require_id, LedgerEngine};
use crate::error::LedgerError;
use crate::paths::{cache_keys, DocPath};
use crate::store::{append_doc, transact, StoreError};
use crate::types::{BalanceDeltas, TransactionRecord, Wallet, WalletPatch};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

/// Outcome of a paired transaction-record + wallet-delta write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedTransaction {
    pub transaction_id: String,
    /// `None` when no deltas were requested.
    pub wallet: Option<Wallet>,
}

impl LedgerEngine {
    /// Compare-and-swap wallet mutator.
    ///
    /// `update` may run several times under contention and returns `None` to
    /// abort. Yields the committed wallet, or `None` when `update` aborted or
    /// the store declined to commit.
    pub(crate) async fn cas_wallet<F>(
        &self,
        user_id: &str,
        mut update: F,
    ) -> Result<Option<Wallet>, StoreError>
    where
        F: FnMut(&Wallet) -> Option<WalletPatch> + Send,
    {
        let path = DocPath::wallet(user_id);
        let committed = transact::<Wallet, _>(self.store.as_ref(), &path, |current| {
            let current = current.unwrap_or_default();
            update(&current).map(|patch| patch.apply_to(&current))
        })
        .await?;

        if let Some(wallet) = committed {
            match serde_json::to_value(wallet) {
                Ok(value) => self.cache.put(&cache_keys::wallet(user_id), value).await,
                Err(_) => self.cache.invalidate(&cache_keys::wallet(user_id)).await,
            }
        }
        Ok(committed)
    }

    /// Admin-only direct wallet adjustment through the compare-and-swap mutator.
    pub async fn adjust_wallet<F>(
        &self,
        actor_id: &str,
        user_id: &str,
        update: F,
    ) -> Result<Option<Wallet>, LedgerError>
    where
        F: FnMut(&Wallet) -> Option<WalletPatch> + Send,
    {
        require_id("user id", user_id)?;
        let path = DocPath::wallet(user_id);
        self.require(actor_id, user_id, Some(Role::Admin), path.as_str())
            .await?;
        Ok(self.cas_wallet(user_id, update).await?)
    }

    /// Create the all-zero wallet if it does not exist yet. Idempotent.
    pub async fn open_wallet(&self, actor_id: &str, user_id: &str) -> Result<Wallet, LedgerError> {
        require_id("user id", user_id)?;
        let path = DocPath::wallet(user_id);
        self.require(actor_id, user_id, None, path.as_str()).await?;

        let created = transact::<Wallet, _>(self.store.as_ref(), &path, |current| match current {
            Some(_) => None,
            None => Some(Wallet::default()),
        })
        .await?;
        if created.is_some() {
            debug!(user_id, "wallet opened");
            self.cache.invalidate(&cache_keys::wallet(user_id)).await;
        }
        self.load_wallet(user_id).await
    }

    /// Current wallet snapshot, served from the read cache when fresh.
    pub async fn wallet(&self, actor_id: &str, user_id: &str) -> Result<Wallet, LedgerError> {
        require_id("user id", user_id)?;
        self.require(actor_id, user_id, None, DocPath::wallet(user_id).as_str())
            .await?;
        self.load_wallet(user_id).await
    }

    async fn load_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        let store = self.store.clone();
        let path = DocPath::wallet(user_id);
        let loader_path = path.clone();
        let value = self
            .cache
            .get_or_load(
                &cache_keys::wallet(user_id),
                async move { store.read(&loader_path).await }.boxed(),
            )
            .await?;

        match value {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| LedgerError::from(StoreError::serialization(&path, e))),
            None => Ok(Wallet::default()),
        }
    }

    /// Append a transaction record, then apply balance deltas to the wallet.
    ///
    /// The record is written first and is never rolled back by the wallet
    /// leg. When the wallet leg fails the record is marked `failed` and the
    /// error propagates. Admin only: owners move money through requests and
    /// reviewed work.
    pub async fn record_transaction(
        &self,
        actor_id: &str,
        user_id: &str,
        record: TransactionRecord,
        deltas: BalanceDeltas,
    ) -> Result<RecordedTransaction, LedgerError> {
        require_id("user id", user_id)?;
        self.require(
            actor_id,
            user_id,
            Some(Role::Admin),
            DocPath::transactions(user_id).as_str(),
        )
        .await?;
        self.record_with_deltas(user_id, record, deltas).await
    }

    pub(crate) async fn record_with_deltas(
        &self,
        user_id: &str,
        record: TransactionRecord,
        deltas: BalanceDeltas,
    ) -> Result<RecordedTransaction, LedgerError> {
        let transaction_id =
            append_doc(self.store.as_ref(), &DocPath::transactions(user_id), &record).await?;
        self.cache
            .invalidate(&cache_keys::transactions(user_id))
            .await;

        if deltas.is_empty() {
            return Ok(RecordedTransaction {
                transaction_id,
                wallet: None,
            });
        }

        let wallet_leg = self
            .cas_wallet(user_id, |current| {
                Some(WalletPatch::from(current.apply_deltas(&deltas)))
            })
            .await;

        let failure = match wallet_leg {
            Ok(Some(wallet)) => {
                return Ok(RecordedTransaction {
                    transaction_id,
                    wallet: Some(wallet),
                })
            }
            Ok(None) => LedgerError::AbortedTransaction(format!(
                "wallet update for transaction '{transaction_id}' did not commit"
            )),
            Err(e) => LedgerError::InfrastructureFailure(e),
        };

        self.mark_record_failed(user_id, &transaction_id).await;
        Err(failure)
    }

    /// Best-effort `failed` status on a record whose later leg did not commit.
    pub(crate) async fn mark_record_failed(&self, user_id: &str, transaction_id: &str) {
        let record_path = DocPath::transaction(user_id, transaction_id);
        if let Err(e) = self
            .store
            .write(&record_path, json!({ "status": "failed" }))
            .await
        {
            warn!(path = %record_path, error = %e, "could not mark orphaned transaction failed");
        } else {
            warn!(path = %record_path, "transaction marked failed");
        }
        self.cache
            .invalidate(&cache_keys::transactions(user_id))
            .await;
    }

    /// Best-effort ledger entry after a committed transfer.
    pub(crate) async fn append_record_best_effort(&self, user_id: &str, record: TransactionRecord) {
        match append_doc(self.store.as_ref(), &DocPath::transactions(user_id), &record).await {
            Ok(_) => {
                self.cache
                    .invalidate(&cache_keys::transactions(user_id))
                    .await
            }
            Err(e) => warn!(user_id, kind = ?record.kind, error = %e, "transaction record append failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::RoleAuthorizer;
    use crate::cache::TtlReadCache;
    use crate::engine::LedgerEngine;
    use crate::error::LedgerError;
    use crate::paths::DocPath;
    use crate::store::{read_doc, DocumentStore, InMemoryDocumentStore, StoreFault};
    use crate::types::{
        BalanceDeltas, BalanceField, TransactionKind, TransactionRecord, TransactionStatus,
        Wallet, WalletPatch,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> (LedgerEngine, Arc<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let engine = LedgerEngine::new(
            store.clone(),
            Arc::new(TtlReadCache::new(Duration::from_secs(30))),
            Arc::new(RoleAuthorizer::with_admins(["admin"])),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn cas_wallet_merges_partial_update() {
        let (engine, _) = engine();
        engine
            .cas_wallet("u1", |_| {
                Some(
                    WalletPatch::new()
                        .earned_balance(100)
                        .added_balance(200)
                        .total_withdrawn(50),
                )
            })
            .await
            .unwrap();

        let wallet = engine
            .cas_wallet("u1", |w| {
                Some(WalletPatch::new().earned_balance(w.earned_balance + 50))
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            wallet,
            Wallet {
                earned_balance: 150,
                added_balance: 200,
                pending_add_money: 0,
                total_withdrawn: 50,
            }
        );
    }

    #[tokio::test]
    async fn cas_wallet_abort_returns_none_and_writes_nothing() {
        let (engine, store) = engine();
        let result = engine.cas_wallet("u1", |_| None).await.unwrap();
        assert!(result.is_none());
        assert!(store.read(&DocPath::wallet("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_wallet_refreshes_cached_snapshot() {
        let (engine, _) = engine();
        assert_eq!(engine.wallet("u1", "u1").await.unwrap(), Wallet::default());

        engine
            .cas_wallet("u1", |_| Some(WalletPatch::new().added_balance(7)))
            .await
            .unwrap();
        assert_eq!(engine.wallet("u1", "u1").await.unwrap().added_balance, 7);
    }

    #[tokio::test]
    async fn open_wallet_is_idempotent() {
        let (engine, _) = engine();
        engine.open_wallet("u1", "u1").await.unwrap();
        engine
            .cas_wallet("u1", |_| Some(WalletPatch::new().earned_balance(9)))
            .await
            .unwrap();

        let reopened = engine.open_wallet("u1", "u1").await.unwrap();
        assert_eq!(reopened.earned_balance, 9);
    }

    #[tokio::test]
    async fn adjust_wallet_requires_admin() {
        let (engine, _) = engine();
        let err = engine
            .adjust_wallet("u1", "u1", |_| Some(WalletPatch::new().earned_balance(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));

        let wallet = engine
            .adjust_wallet("admin", "u1", |_| Some(WalletPatch::new().earned_balance(1)))
            .await
            .unwrap();
        assert_eq!(wallet.map(|w| w.earned_balance), Some(1));
    }

    #[tokio::test]
    async fn record_then_delta_clamps_and_keeps_record() {
        let (engine, store) = engine();
        let recorded = engine
            .record_transaction(
                "admin",
                "u1",
                TransactionRecord::new(TransactionKind::AddMoney, 100, TransactionStatus::Pending),
                BalanceDeltas::new()
                    .with(BalanceField::PendingAddMoney, 100)
                    .with(BalanceField::EarnedBalance, -30),
            )
            .await
            .unwrap();

        let wallet = recorded.wallet.unwrap();
        assert_eq!(wallet.pending_add_money, 100);
        assert_eq!(wallet.earned_balance, 0);

        let record: Option<TransactionRecord> = read_doc(
            store.as_ref(),
            &DocPath::transaction("u1", &recorded.transaction_id),
        )
        .await
        .unwrap();
        assert_eq!(record.map(|r| r.status), Some(TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn owners_cannot_credit_their_own_wallet() {
        let (engine, store) = engine();
        let err = engine
            .record_transaction(
                "u1",
                "u1",
                TransactionRecord::new(
                    TransactionKind::Earning,
                    1_000_000,
                    TransactionStatus::Approved,
                ),
                BalanceDeltas::new().with(BalanceField::EarnedBalance, 1_000_000),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
        assert_eq!(engine.wallet("u1", "u1").await.unwrap().earned_balance, 0);
        assert!(store.paths_with_prefix("transactions/u1/").is_empty());

        let err = engine
            .request_withdrawal("u1", "u1", 1_000_000, "u1@upi")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn failed_wallet_leg_marks_record_failed() {
        let (engine, store) = engine();
        store.inject_fault("wallets/", StoreFault::CompareAndSwap);

        let err = engine
            .record_transaction(
                "admin",
                "u1",
                TransactionRecord::new(TransactionKind::AddMoney, 100, TransactionStatus::Pending),
                BalanceDeltas::new().with(BalanceField::PendingAddMoney, 100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InfrastructureFailure(_)));

        let paths = store.paths_with_prefix("transactions/u1/");
        assert_eq!(paths.len(), 1);
        let record: Option<TransactionRecord> = read_doc(store.as_ref(), &DocPath::new(&paths[0]))
            .await
            .unwrap();
        assert_eq!(record.map(|r| r.status), Some(TransactionStatus::Failed));
    }
}
