use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger engine errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unauthorized: actor '{actor}' may not act on '{resource}'")]
    Unauthorized { actor: String, resource: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Transaction aborted: {0}")]
    AbortedTransaction(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Infrastructure failure: {0}")]
    InfrastructureFailure(#[from] StoreError),

    /// A compensating write failed after a partial transfer; manual reconciliation required.
    #[error("Compensation failed on '{resource}' after {operation}: {source}")]
    CompensationFailed {
        operation: &'static str,
        resource: String,
        source: StoreError,
    },
}

impl LedgerError {
    pub fn unauthorized(actor: &str, resource: impl Into<String>) -> Self {
        Self::Unauthorized {
            actor: actor.to_string(),
            resource: resource.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized { .. } => FailureKind::Unauthorized,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::PreconditionFailed(_) | Self::InvalidInput(_) => FailureKind::PreconditionFailed,
            Self::AbortedTransaction(_) => FailureKind::AbortedTransaction,
            Self::InfrastructureFailure(_) | Self::CompensationFailed { .. } => {
                FailureKind::InfrastructureFailure
            }
        }
    }
}

/// Coarse failure classification kept for observability on declined transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unauthorized,
    NotFound,
    PreconditionFailed,
    AbortedTransaction,
    InfrastructureFailure,
}

impl FailureKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::PreconditionFailed => "precondition_failed",
            Self::AbortedTransaction => "aborted_transaction",
            Self::InfrastructureFailure => "infrastructure_failure",
        }
    }
}
