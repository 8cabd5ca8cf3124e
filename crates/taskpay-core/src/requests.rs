//! Add-money and withdrawal requests resolved by admins.
//!
//! External references are recorded as claimed; no payment is verified.

use crate::auth::Role;
use crate::engine::{require_amount, require_id, LedgerEngine};
use crate::error::{FailureKind, LedgerError};
use crate::paths::{cache_keys, DocPath};
use crate::store::{append_doc, read_doc};
use crate::types::{
    Amount, BalanceDeltas, BalanceField, Keyed, MoneyRequest, MoneyRequestKind, RequestStatus,
    Resolution, TransactionKind, TransactionRecord, TransactionStatus, TransferOutcome, Wallet,
    WalletPatch,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

impl LedgerEngine {
    /// File a deposit claim: records a pending `add_money` transaction, raises
    /// `pendingAddMoney`, then queues the request for an admin.
    pub async fn request_add_money(
        &self,
        actor_id: &str,
        user_id: &str,
        amount: Amount,
        upi_transaction_id: &str,
    ) -> Result<Keyed<MoneyRequest>, LedgerError> {
        require_id("user id", user_id)?;
        let kind = MoneyRequestKind::AddMoney;
        self.require(actor_id, user_id, None, DocPath::money_requests(kind).as_str())
            .await?;
        require_amount(amount)?;
        require_reference("upi transaction id", upi_transaction_id)?;
        let delta = i64::try_from(amount)
            .map_err(|_| LedgerError::InvalidInput(format!("amount {amount} is too large")))?;

        let recorded = self
            .record_with_deltas(
                user_id,
                TransactionRecord::new(TransactionKind::AddMoney, amount, TransactionStatus::Pending)
                    .with_reference(upi_transaction_id),
                BalanceDeltas::new().with(BalanceField::PendingAddMoney, delta),
            )
            .await?;

        let request = MoneyRequest {
            user_id: user_id.to_string(),
            kind,
            amount,
            status: RequestStatus::Pending,
            external_reference: upi_transaction_id.to_string(),
            transaction_id: Some(recorded.transaction_id.clone()),
            created_at: Utc::now(),
            processed_at: None,
            processed_by: None,
        };
        let request_id =
            match append_doc(self.store.as_ref(), &DocPath::money_requests(kind), &request).await {
                Ok(request_id) => request_id,
                Err(e) => {
                    warn!(user_id, amount, error = %e, "add-money request not queued; releasing pending deposit");
                    self.mark_record_failed(user_id, &recorded.transaction_id)
                        .await;
                    let released = self
                        .cas_wallet(user_id, |wallet| {
                            Some(
                                WalletPatch::new()
                                    .pending_add_money(wallet.pending_add_money.saturating_sub(amount)),
                            )
                        })
                        .await;
                    self.finish_compensation(
                        "request_add_money",
                        &DocPath::wallet(user_id),
                        released,
                    )?;
                    return Err(e.into());
                }
            };

        info!(user_id, amount, request_id = %request_id, "add-money request filed");
        self.cache.invalidate(&cache_keys::requests(kind)).await;
        Ok(Keyed::new(request_id, request))
    }

    /// File a payout request against the earned balance. Nothing is debited until approval.
    pub async fn request_withdrawal(
        &self,
        actor_id: &str,
        user_id: &str,
        amount: Amount,
        upi_id: &str,
    ) -> Result<Keyed<MoneyRequest>, LedgerError> {
        require_id("user id", user_id)?;
        let kind = MoneyRequestKind::Withdrawal;
        self.require(actor_id, user_id, None, DocPath::money_requests(kind).as_str())
            .await?;
        require_amount(amount)?;
        require_reference("upi id", upi_id)?;

        let wallet = read_doc::<Wallet>(self.store.as_ref(), &DocPath::wallet(user_id))
            .await?
            .unwrap_or_default();
        if wallet.earned_balance < amount {
            return Err(LedgerError::PreconditionFailed(format!(
                "earned balance {} is below requested withdrawal {amount}",
                wallet.earned_balance
            )));
        }

        let recorded = self
            .record_with_deltas(
                user_id,
                TransactionRecord::new(
                    TransactionKind::Withdrawal,
                    amount,
                    TransactionStatus::Pending,
                )
                .with_reference(upi_id),
                BalanceDeltas::new(),
            )
            .await?;

        let request = MoneyRequest {
            user_id: user_id.to_string(),
            kind,
            amount,
            status: RequestStatus::Pending,
            external_reference: upi_id.to_string(),
            transaction_id: Some(recorded.transaction_id.clone()),
            created_at: Utc::now(),
            processed_at: None,
            processed_by: None,
        };
        let request_id =
            match append_doc(self.store.as_ref(), &DocPath::money_requests(kind), &request).await {
                Ok(request_id) => request_id,
                Err(e) => {
                    warn!(user_id, amount, error = %e, "withdrawal request not queued");
                    self.mark_record_failed(user_id, &recorded.transaction_id)
                        .await;
                    return Err(e.into());
                }
            };

        info!(user_id, amount, request_id = %request_id, "withdrawal request filed");
        self.cache.invalidate(&cache_keys::requests(kind)).await;
        Ok(Keyed::new(request_id, request))
    }

    /// Resolve a pending money request.
    ///
    /// The request status is written first. An approval then moves the
    /// wallet; if that leg does not commit the request goes back to
    /// `pending`.
    pub async fn process_money_request(
        &self,
        actor_id: &str,
        request_id: &str,
        kind: MoneyRequestKind,
        user_id: &str,
        amount: Amount,
        resolution: Resolution,
    ) -> Result<TransferOutcome, LedgerError> {
        require_id("request id", request_id)?;
        require_id("user id", user_id)?;
        let path = DocPath::money_request(kind, request_id);
        self.require(actor_id, user_id, Some(Role::Admin), path.as_str())
            .await?;

        let request = read_doc::<MoneyRequest>(self.store.as_ref(), &path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("request '{path}'")))?;
        if request.user_id != user_id || request.amount != amount {
            return Err(LedgerError::InvalidInput(format!(
                "request '{request_id}' is for {} of {}, not {user_id} of {amount}",
                request.user_id, request.amount
            )));
        }
        if request.status != RequestStatus::Pending {
            warn!(path = %path, "request already resolved");
            return Ok(TransferOutcome::declined(
                FailureKind::PreconditionFailed,
                format!("request '{request_id}' is already resolved"),
            ));
        }

        self.store
            .write(
                &path,
                json!({
                    "status": RequestStatus::from(resolution),
                    "processedAt": Utc::now(),
                    "processedBy": actor_id,
                }),
            )
            .await?;

        if resolution == Resolution::Rejected {
            info!(path = %path, "money request rejected");
            self.settle_request_record(user_id, &request, resolution).await;
            self.invalidate(&[cache_keys::requests(kind)]).await;
            return Ok(TransferOutcome::Completed);
        }

        let mut insufficient = false;
        let wallet_leg = match kind {
            MoneyRequestKind::AddMoney => {
                self.cas_wallet(user_id, |wallet| {
                    Some(
                        WalletPatch::new()
                            .added_balance(wallet.added_balance.saturating_add(amount))
                            .pending_add_money(wallet.pending_add_money.saturating_sub(amount)),
                    )
                })
                .await
            }
            MoneyRequestKind::Withdrawal => {
                self.cas_wallet(user_id, |wallet| {
                    insufficient = wallet.earned_balance < amount;
                    (!insufficient).then(|| {
                        WalletPatch::new()
                            .earned_balance(wallet.earned_balance - amount)
                            .total_withdrawn(wallet.total_withdrawn.saturating_add(amount))
                    })
                })
                .await
            }
        };

        let (failure, detail) = match wallet_leg {
            Ok(Some(_)) => {
                info!(path = %path, user_id, amount, "money request approved");
                self.settle_request_record(user_id, &request, resolution).await;
                if kind == MoneyRequestKind::Withdrawal {
                    self.bump_profile(user_id, |profile| {
                        profile.total_withdrawn = profile.total_withdrawn.saturating_add(amount);
                    })
                    .await;
                }
                self.invalidate(&[
                    cache_keys::wallet(user_id),
                    cache_keys::requests(kind),
                    cache_keys::transactions(user_id),
                ])
                .await;
                return Ok(TransferOutcome::Completed);
            }
            Ok(None) if insufficient => (
                FailureKind::PreconditionFailed,
                format!("earned balance is below {amount}"),
            ),
            Ok(None) => (
                FailureKind::AbortedTransaction,
                "wallet update did not commit".to_string(),
            ),
            Err(e) => (FailureKind::InfrastructureFailure, e.to_string()),
        };

        warn!(path = %path, kind = failure.name(), detail = %detail, "wallet leg failed; reopening request");
        let reopened = self
            .store
            .write(
                &path,
                json!({ "status": "pending", "processedAt": null, "processedBy": null }),
            )
            .await
            .map(Some);
        self.finish_compensation("process_money_request", &path, reopened)?;

        Ok(TransferOutcome::compensated(failure, detail))
    }

    pub async fn money_request(
        &self,
        actor_id: &str,
        kind: MoneyRequestKind,
        request_id: &str,
    ) -> Result<MoneyRequest, LedgerError> {
        require_id("request id", request_id)?;
        let path = DocPath::money_request(kind, request_id);
        let request = read_doc::<MoneyRequest>(self.store.as_ref(), &path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("request '{path}'")))?;
        self.require(actor_id, &request.user_id, None, path.as_str())
            .await?;
        Ok(request)
    }

    async fn settle_request_record(
        &self,
        user_id: &str,
        request: &MoneyRequest,
        resolution: Resolution,
    ) {
        let Some(transaction_id) = request.transaction_id.as_deref() else {
            return;
        };
        let path = DocPath::transaction(user_id, transaction_id);
        let status = TransactionStatus::from(resolution);
        match self.store.write(&path, json!({ "status": status })).await {
            Ok(()) => {
                self.cache
                    .invalidate(&cache_keys::transactions(user_id))
                    .await
            }
            Err(e) => warn!(path = %path, error = %e, "transaction status follow-up failed"),
        }
    }
}

fn require_reference(name: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidInput(format!("{name} must not be empty")));
    }
    Ok(())
}
