//! Campaign funding and budget transfers.
//!
//! The campaign document is always the primary resource: it is mutated
//! first because it is the one that can be reverted safely, and the wallet
//! leg runs second. A failed wallet leg compensates the campaign.

use crate::auth::Role;
use crate::engine::{require_amount, require_id, LedgerEngine};
use crate::error::{FailureKind, LedgerError};
use crate::paths::{cache_keys, DocPath};
use crate::store::{append_doc, read_doc, transact, StoreError};
use crate::types::{
    Amount, Campaign, CampaignDraft, CampaignStatus, TransactionKind, TransactionRecord,
    TransactionStatus, TransferOutcome, WalletPatch,
};
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};

/// Result of [`LedgerEngine::launch_campaign`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReport {
    pub campaign_id: String,
    pub outcome: TransferOutcome,
}

impl LedgerEngine {
    /// Create a funded campaign and debit its budget from the creator's added balance.
    ///
    /// When the wallet cannot cover the budget the new campaign is marked
    /// `failed` with no remaining budget.
    pub async fn launch_campaign(
        &self,
        actor_id: &str,
        creator_id: &str,
        draft: CampaignDraft,
    ) -> Result<LaunchReport, LedgerError> {
        require_id("creator id", creator_id)?;
        self.require(actor_id, creator_id, None, DocPath::campaigns().as_str())
            .await?;
        if draft.title.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "campaign title must not be empty".to_string(),
            ));
        }
        require_amount(draft.reward_per_worker)?;
        if draft.total_workers == 0 {
            return Err(LedgerError::InvalidInput(
                "campaign needs at least one worker".to_string(),
            ));
        }
        let budget = draft.budget().ok_or_else(|| {
            LedgerError::InvalidInput("campaign budget overflows".to_string())
        })?;

        let campaign = Campaign::from_draft(creator_id, &draft, budget);
        let campaign_id =
            append_doc(self.store.as_ref(), &DocPath::campaigns(), &campaign).await?;

        let mut insufficient = false;
        let wallet_leg = self
            .cas_wallet(creator_id, |wallet| {
                insufficient = wallet.added_balance < budget;
                (!insufficient)
                    .then(|| WalletPatch::new().added_balance(wallet.added_balance - budget))
            })
            .await;

        let (kind, detail) = match wallet_leg {
            Ok(Some(_)) => {
                info!(campaign_id = %campaign_id, creator_id, budget, "campaign launched");
                self.append_record_best_effort(
                    creator_id,
                    TransactionRecord::new(
                        TransactionKind::CampaignSpend,
                        budget,
                        TransactionStatus::Approved,
                    )
                    .with_reference(campaign_id.clone()),
                )
                .await;
                self.invalidate(&[
                    cache_keys::wallet(creator_id),
                    cache_keys::ALL_CAMPAIGNS.to_string(),
                ])
                .await;
                return Ok(LaunchReport {
                    campaign_id,
                    outcome: TransferOutcome::Completed,
                });
            }
            Ok(None) if insufficient => (
                FailureKind::PreconditionFailed,
                format!("added balance does not cover campaign budget {budget}"),
            ),
            Ok(None) => (
                FailureKind::AbortedTransaction,
                "wallet debit did not commit".to_string(),
            ),
            Err(e) => (FailureKind::InfrastructureFailure, e.to_string()),
        };

        warn!(campaign_id = %campaign_id, creator_id, kind = kind.name(), detail = %detail, "campaign funding declined");
        let path = DocPath::campaign(&campaign_id);
        let compensated = transact::<Campaign, _>(self.store.as_ref(), &path, |current| {
            current.map(|mut campaign| {
                campaign.status = CampaignStatus::Failed;
                campaign.remaining_budget = 0;
                campaign
            })
        })
        .await;
        self.finish_compensation("launch_campaign", &path, compensated)?;

        Ok(LaunchReport {
            campaign_id,
            outcome: TransferOutcome::compensated(kind, detail),
        })
    }

    /// Move `amount` from a campaign's remaining budget against the owner's added balance.
    ///
    /// Budget first, wallet second. A declined wallet leg puts the amount
    /// back on the campaign before returning.
    pub async fn deduct_campaign_budget(
        &self,
        actor_id: &str,
        campaign_id: &str,
        amount: Amount,
        user_id: &str,
    ) -> Result<TransferOutcome, LedgerError> {
        require_id("campaign id", campaign_id)?;
        require_id("user id", user_id)?;
        let path = DocPath::campaign(campaign_id);
        self.require(actor_id, user_id, None, path.as_str()).await?;
        require_amount(amount)?;

        let campaign = read_doc::<Campaign>(self.store.as_ref(), &path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("campaign '{campaign_id}'")))?;
        if campaign.creator_id != user_id {
            return Err(LedgerError::unauthorized(actor_id, path.as_str()));
        }

        let mut short_budget = false;
        let deducted = transact::<Campaign, _>(self.store.as_ref(), &path, |current| {
            let mut campaign = current?;
            short_budget = campaign.remaining_budget < amount;
            if short_budget {
                return None;
            }
            campaign.remaining_budget -= amount;
            Some(campaign)
        })
        .await?;

        if deducted.is_none() {
            let outcome = if short_budget {
                TransferOutcome::declined(
                    FailureKind::PreconditionFailed,
                    format!("remaining budget is below {amount}"),
                )
            } else {
                TransferOutcome::declined(
                    FailureKind::AbortedTransaction,
                    "campaign budget update did not commit",
                )
            };
            warn!(campaign_id, amount, "budget deduction declined on campaign");
            return Ok(outcome);
        }

        let mut insufficient = false;
        let wallet_leg = self
            .cas_wallet(user_id, |wallet| {
                insufficient = wallet.added_balance < amount;
                (!insufficient)
                    .then(|| WalletPatch::new().added_balance(wallet.added_balance - amount))
            })
            .await;

        let (kind, detail) = match wallet_leg {
            Ok(Some(_)) => {
                info!(campaign_id, user_id, amount, "campaign budget deducted");
                self.append_record_best_effort(
                    user_id,
                    TransactionRecord::new(
                        TransactionKind::CampaignSpend,
                        amount,
                        TransactionStatus::Approved,
                    )
                    .with_reference(campaign_id),
                )
                .await;
                self.invalidate(&[
                    cache_keys::wallet(user_id),
                    cache_keys::campaign(campaign_id),
                    cache_keys::ALL_CAMPAIGNS.to_string(),
                ])
                .await;
                return Ok(TransferOutcome::Completed);
            }
            Ok(None) if insufficient => (
                FailureKind::PreconditionFailed,
                format!("added balance is below {amount}"),
            ),
            Ok(None) => (
                FailureKind::AbortedTransaction,
                "wallet debit did not commit".to_string(),
            ),
            Err(e) => (FailureKind::InfrastructureFailure, e.to_string()),
        };

        warn!(campaign_id, user_id, amount, kind = kind.name(), detail = %detail, "wallet leg declined; restoring budget");
        // Adds back onto the current value so concurrent deductions are not lost.
        let restored = transact::<Campaign, _>(self.store.as_ref(), &path, |current| {
            current.map(|mut campaign| {
                campaign.remaining_budget = campaign
                    .remaining_budget
                    .saturating_add(amount)
                    .min(campaign.total_budget);
                campaign
            })
        })
        .await;
        self.finish_compensation("deduct_campaign_budget", &path, restored)?;

        Ok(TransferOutcome::compensated(kind, detail))
    }

    /// Owners pause and resume; admins may also ban or complete.
    pub async fn set_campaign_status(
        &self,
        actor_id: &str,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<Campaign, LedgerError> {
        require_id("campaign id", campaign_id)?;
        let path = DocPath::campaign(campaign_id);
        let campaign = read_doc::<Campaign>(self.store.as_ref(), &path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("campaign '{campaign_id}'")))?;

        let role = match status {
            CampaignStatus::Active | CampaignStatus::Paused => None,
            CampaignStatus::Banned | CampaignStatus::Completed => Some(Role::Admin),
            CampaignStatus::Failed => {
                return Err(LedgerError::InvalidInput(
                    "campaigns only become failed through funding compensation".to_string(),
                ))
            }
        };
        self.require(actor_id, &campaign.creator_id, role, path.as_str())
            .await?;

        let mut terminal: Option<CampaignStatus> = None;
        let updated = transact::<Campaign, _>(self.store.as_ref(), &path, |current| {
            let mut campaign = current?;
            if campaign.status.is_terminal() {
                terminal = Some(campaign.status);
                return None;
            }
            campaign.status = status;
            Some(campaign)
        })
        .await?;

        match updated {
            Some(campaign) => {
                info!(campaign_id, status = status.name(), "campaign status changed");
                self.invalidate(&[
                    cache_keys::campaign(campaign_id),
                    cache_keys::ALL_CAMPAIGNS.to_string(),
                ])
                .await;
                Ok(campaign)
            }
            None => Err(match terminal {
                Some(current) => LedgerError::PreconditionFailed(format!(
                    "campaign '{campaign_id}' is {} and can no longer change status",
                    current.name()
                )),
                None => LedgerError::AbortedTransaction(format!(
                    "status update on campaign '{campaign_id}' did not commit"
                )),
            }),
        }
    }

    /// Campaign document, served from the read cache when fresh.
    pub async fn campaign(&self, campaign_id: &str) -> Result<Campaign, LedgerError> {
        require_id("campaign id", campaign_id)?;
        let path = DocPath::campaign(campaign_id);
        let store = self.store.clone();
        let loader_path = path.clone();
        let value = self
            .cache
            .get_or_load(
                &cache_keys::campaign(campaign_id),
                async move { store.read(&loader_path).await }.boxed(),
            )
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("campaign '{campaign_id}'")))?;

        serde_json::from_value(value)
            .map_err(|e| LedgerError::from(StoreError::serialization(&path, e)))
    }

    /// Surface a failed compensating write; the caller's transfer is left half-applied.
    pub(crate) fn finish_compensation<T>(
        &self,
        operation: &'static str,
        path: &DocPath,
        result: Result<Option<T>, StoreError>,
    ) -> Result<(), LedgerError> {
        match result {
            Ok(Some(_)) => {
                info!(operation, path = %path, "compensation applied");
                Ok(())
            }
            Ok(None) => {
                warn!(operation, path = %path, "compensation target missing or not committed");
                Ok(())
            }
            Err(source) => {
                error!(operation, path = %path, error = %source, "compensating write failed; manual reconciliation required");
                Err(LedgerError::CompensationFailed {
                    operation,
                    resource: path.to_string(),
                    source,
                })
            }
        }
    }
}
