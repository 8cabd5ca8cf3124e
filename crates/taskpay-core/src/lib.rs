//! Taskpay wallet ledger engine.
//!
//! Moves value between user wallets, campaign budgets, and admin-mediated
//! money requests on top of a document store that only offers single-path
//! compare-and-swap. Balances never go negative, and every two-document
//! transfer mutates its revertible primary first and compensates it when the
//! secondary leg fails.

#![deny(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod campaign;
pub mod engine;
pub mod error;
pub mod paths;
pub mod profile;
pub mod requests;
pub mod store;
pub mod types;
pub mod wallet;
pub mod work;

pub use auth::{Authorizer, Role, RoleAuthorizer};
pub use cache::{CacheLoad, CachePort, NoopCache, TtlReadCache};
pub use campaign::LaunchReport;
pub use engine::{LedgerEngine, LedgerEngineConfig};
pub use error::{FailureKind, LedgerError};
pub use paths::{cache_keys, DocPath};
pub use store::{
    CasDecision, CasOutcome, DocumentStorageConfig, DocumentStore, InMemoryDocumentStore,
    StoreError, StoreFault, StoreResult,
};
#[cfg(feature = "postgres")]
pub use store::PostgresDocumentStore;
pub use types::{
    Amount, BalanceDeltas, BalanceField, Campaign, CampaignDraft, CampaignStatus, Keyed,
    MoneyRequest, MoneyRequestKind, RequestStatus, Resolution, TransactionKind,
    TransactionRecord, TransactionStatus, TransferOutcome, UserProfile, Wallet, WalletPatch,
    WorkStatus, WorkSubmission,
};
pub use wallet::RecordedTransaction;
