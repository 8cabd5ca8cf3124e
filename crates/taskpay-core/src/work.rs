//! Work submissions: applying to campaigns and the review state machine.
//!
//! `pending -> approved` is terminal and credits the worker's earned
//! balance. `pending -> rejected` can be resubmitted back to `pending`.

use crate::auth::Role;
use crate::engine::{require_amount, require_id, LedgerEngine};
use crate::error::{FailureKind, LedgerError};
use crate::paths::{cache_keys, DocPath};
use crate::store::{read_doc, transact};
use crate::types::{
    Amount, Campaign, CampaignStatus, Keyed, TransactionKind, TransactionRecord,
    TransactionStatus, TransferOutcome, WalletPatch, WorkStatus, WorkSubmission,
};
use chrono::Utc;
use serde_json::{json, Map};
use tracing::{info, warn};

impl LedgerEngine {
    /// Reserve a slot on an active campaign and create the worker's submission.
    ///
    /// One submission per (worker, campaign): the work id is the campaign id.
    pub async fn apply_to_campaign(
        &self,
        actor_id: &str,
        user_id: &str,
        campaign_id: &str,
        proof_url: &str,
    ) -> Result<Keyed<WorkSubmission>, LedgerError> {
        require_id("user id", user_id)?;
        require_id("campaign id", campaign_id)?;
        let work_path = DocPath::work(user_id, campaign_id);
        self.require(actor_id, user_id, None, work_path.as_str())
            .await?;
        if proof_url.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "proof url must not be empty".to_string(),
            ));
        }

        let campaign_path = DocPath::campaign(campaign_id);
        let campaign = read_doc::<Campaign>(self.store.as_ref(), &campaign_path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("campaign '{campaign_id}'")))?;
        if campaign.creator_id == user_id {
            return Err(LedgerError::PreconditionFailed(
                "creators cannot work on their own campaign".to_string(),
            ));
        }
        ensure_open(&campaign, campaign_id)?;

        if self.store.read(&work_path).await?.is_some() {
            return Err(LedgerError::PreconditionFailed(format!(
                "already applied to campaign '{campaign_id}'"
            )));
        }

        let mut closed: Option<LedgerError> = None;
        let reserved = transact::<Campaign, _>(self.store.as_ref(), &campaign_path, |current| {
            let mut campaign = current?;
            if let Err(e) = ensure_open(&campaign, campaign_id) {
                closed = Some(e);
                return None;
            }
            campaign.completed_workers += 1;
            Some(campaign)
        })
        .await?;
        let Some(reserved) = reserved else {
            return Err(closed.unwrap_or_else(|| {
                LedgerError::AbortedTransaction(format!(
                    "slot reservation on campaign '{campaign_id}' did not commit"
                ))
            }));
        };

        let submission = WorkSubmission {
            user_id: user_id.to_string(),
            campaign_id: campaign_id.to_string(),
            status: WorkStatus::Pending,
            reward: reserved.reward_per_worker,
            proof_url: proof_url.to_string(),
            submitted_at: Utc::now(),
            reviewed_at: None,
            review_note: None,
            extra: Map::new(),
        };
        let created = transact::<WorkSubmission, _>(self.store.as_ref(), &work_path, |current| {
            match current {
                Some(_) => None,
                None => Some(submission.clone()),
            }
        })
        .await;

        match created {
            Ok(Some(work)) => {
                info!(user_id, campaign_id, "work submitted");
                self.invalidate(&[
                    cache_keys::works(user_id),
                    cache_keys::campaign(campaign_id),
                    cache_keys::ALL_CAMPAIGNS.to_string(),
                ])
                .await;
                Ok(Keyed::new(campaign_id, work))
            }
            Ok(None) => {
                self.release_slot(&campaign_path).await?;
                Err(LedgerError::PreconditionFailed(format!(
                    "already applied to campaign '{campaign_id}'"
                )))
            }
            Err(e) => {
                self.release_slot(&campaign_path).await?;
                Err(e.into())
            }
        }
    }

    async fn release_slot(&self, campaign_path: &DocPath) -> Result<(), LedgerError> {
        let released = transact::<Campaign, _>(self.store.as_ref(), campaign_path, |current| {
            current.map(|mut campaign| {
                campaign.completed_workers = campaign.completed_workers.saturating_sub(1);
                campaign
            })
        })
        .await;
        self.finish_compensation("apply_to_campaign", campaign_path, released)
    }

    /// Approve a pending submission and credit the reward to the worker's earned balance.
    pub async fn approve_work(
        &self,
        actor_id: &str,
        work_id: &str,
        worker_id: &str,
        campaign_id: &str,
        reward: Amount,
    ) -> Result<TransferOutcome, LedgerError> {
        require_id("work id", work_id)?;
        require_id("worker id", worker_id)?;
        let path = DocPath::work(worker_id, work_id);
        self.require(actor_id, worker_id, Some(Role::Admin), path.as_str())
            .await?;
        require_amount(reward)?;

        let work = read_doc::<WorkSubmission>(self.store.as_ref(), &path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("work '{path}'")))?;
        if work.campaign_id != campaign_id {
            return Err(LedgerError::InvalidInput(format!(
                "work '{work_id}' belongs to campaign '{}'",
                work.campaign_id
            )));
        }
        if work.reward != reward {
            return Err(LedgerError::InvalidInput(format!(
                "work '{work_id}' pays {}, not {reward}",
                work.reward
            )));
        }
        if work.status != WorkStatus::Pending {
            warn!(path = %path, status = work.status.name(), "approval declined");
            return Ok(TransferOutcome::declined(
                FailureKind::PreconditionFailed,
                format!("work is {}", work.status.name()),
            ));
        }

        let reviewed_at = Utc::now();
        match self
            .transition_work(&path, WorkStatus::Pending, |work| {
                work.status = WorkStatus::Approved;
                work.reviewed_at = Some(reviewed_at);
            })
            .await
        {
            Ok(_) => {}
            Err(e @ (LedgerError::PreconditionFailed(_) | LedgerError::AbortedTransaction(_))) => {
                warn!(path = %path, error = %e, "approval declined");
                return Ok(TransferOutcome::declined(e.kind(), e.to_string()));
            }
            Err(e) => return Err(e),
        }

        let wallet_leg = self
            .cas_wallet(worker_id, |wallet| {
                Some(WalletPatch::new().earned_balance(wallet.earned_balance.saturating_add(reward)))
            })
            .await;

        let (kind, detail) = match wallet_leg {
            Ok(Some(_)) => {
                info!(worker_id, work_id, campaign_id, reward, "work approved and credited");
                self.append_record_best_effort(
                    worker_id,
                    TransactionRecord::new(
                        TransactionKind::Earning,
                        reward,
                        TransactionStatus::Approved,
                    )
                    .with_reference(work_id),
                )
                .await;
                self.bump_profile(worker_id, |profile| {
                    profile.earned_money = profile.earned_money.saturating_add(reward);
                    profile.approved_works += 1;
                })
                .await;
                self.invalidate(&[cache_keys::wallet(worker_id), cache_keys::works(worker_id)])
                    .await;
                return Ok(TransferOutcome::Completed);
            }
            Ok(None) => (
                FailureKind::AbortedTransaction,
                "wallet credit did not commit".to_string(),
            ),
            Err(e) => (FailureKind::InfrastructureFailure, e.to_string()),
        };

        warn!(path = %path, kind = kind.name(), detail = %detail, "wallet credit failed; reopening work");
        let reopened = self
            .store
            .write(&path, json!({ "status": "pending", "reviewedAt": null }))
            .await
            .map(Some);
        self.finish_compensation("approve_work", &path, reopened)?;

        Ok(TransferOutcome::compensated(kind, detail))
    }

    /// Reject a pending submission.
    pub async fn reject_work(
        &self,
        actor_id: &str,
        work_id: &str,
        worker_id: &str,
        note: Option<String>,
    ) -> Result<WorkSubmission, LedgerError> {
        require_id("work id", work_id)?;
        require_id("worker id", worker_id)?;
        let path = DocPath::work(worker_id, work_id);
        self.require(actor_id, worker_id, Some(Role::Admin), path.as_str())
            .await?;

        let reviewed_at = Utc::now();
        let work = self
            .transition_work(&path, WorkStatus::Pending, |work| {
                work.status = WorkStatus::Rejected;
                work.reviewed_at = Some(reviewed_at);
                work.review_note = note.clone();
            })
            .await?;
        self.cache.invalidate(&cache_keys::works(worker_id)).await;
        Ok(work)
    }

    /// Put a rejected submission back in the review queue with fresh proof.
    pub async fn resubmit_work(
        &self,
        actor_id: &str,
        work_id: &str,
        worker_id: &str,
        proof_url: &str,
    ) -> Result<WorkSubmission, LedgerError> {
        require_id("work id", work_id)?;
        require_id("worker id", worker_id)?;
        let path = DocPath::work(worker_id, work_id);
        self.require(actor_id, worker_id, None, path.as_str())
            .await?;
        if proof_url.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "proof url must not be empty".to_string(),
            ));
        }

        let submitted_at = Utc::now();
        let work = self
            .transition_work(&path, WorkStatus::Rejected, |work| {
                work.status = WorkStatus::Pending;
                work.proof_url = proof_url.to_string();
                work.submitted_at = submitted_at;
                work.reviewed_at = None;
                work.review_note = None;
            })
            .await?;
        self.cache.invalidate(&cache_keys::works(worker_id)).await;
        Ok(work)
    }

    pub async fn work(
        &self,
        actor_id: &str,
        worker_id: &str,
        work_id: &str,
    ) -> Result<WorkSubmission, LedgerError> {
        require_id("work id", work_id)?;
        require_id("worker id", worker_id)?;
        let path = DocPath::work(worker_id, work_id);
        self.require(actor_id, worker_id, None, path.as_str())
            .await?;
        read_doc::<WorkSubmission>(self.store.as_ref(), &path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("work '{path}'")))
    }

    async fn transition_work<F>(
        &self,
        path: &DocPath,
        from: WorkStatus,
        mut apply: F,
    ) -> Result<WorkSubmission, LedgerError>
    where
        F: FnMut(&mut WorkSubmission) + Send,
    {
        let mut seen: Option<WorkStatus> = None;
        let committed = transact::<WorkSubmission, _>(self.store.as_ref(), path, |current| {
            let mut work = current?;
            seen = Some(work.status);
            if work.status != from {
                return None;
            }
            apply(&mut work);
            Some(work)
        })
        .await?;

        match (committed, seen) {
            (Some(work), _) => Ok(work),
            (None, None) => Err(LedgerError::NotFound(format!("work '{path}'"))),
            (None, Some(status)) if status != from => Err(LedgerError::PreconditionFailed(
                format!("work is {}, expected {}", status.name(), from.name()),
            )),
            (None, Some(_)) => Err(LedgerError::AbortedTransaction(format!(
                "status update on '{path}' did not commit"
            ))),
        }
    }
}

fn ensure_open(campaign: &Campaign, campaign_id: &str) -> Result<(), LedgerError> {
    if campaign.status != CampaignStatus::Active {
        return Err(LedgerError::PreconditionFailed(format!(
            "campaign '{campaign_id}' is {}",
            campaign.status.name()
        )));
    }
    if !campaign.has_open_slots() {
        return Err(LedgerError::PreconditionFailed(format!(
            "campaign '{campaign_id}' has no open slots"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::auth::RoleAuthorizer;
    use crate::cache::NoopCache;
    use crate::engine::LedgerEngine;
    use crate::error::{FailureKind, LedgerError};
    use crate::store::{InMemoryDocumentStore, StoreFault};
    use crate::types::{CampaignDraft, CampaignStatus, TransferOutcome, WalletPatch, WorkStatus};
    use std::sync::Arc;

    async fn setup(slots: u32) -> (LedgerEngine, Arc<InMemoryDocumentStore>, String) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let engine = LedgerEngine::new(
            store.clone(),
            Arc::new(NoopCache),
            Arc::new(RoleAuthorizer::with_admins(["admin"])),
        );
        engine
            .cas_wallet("owner", |_| Some(WalletPatch::new().added_balance(1_000)))
            .await
            .unwrap();
        let campaign_id = engine
            .launch_campaign("owner", "owner", CampaignDraft::new("Review app", 25, slots))
            .await
            .unwrap()
            .campaign_id;
        (engine, store, campaign_id)
    }

    #[tokio::test]
    async fn apply_reserves_one_slot_per_worker() {
        let (engine, _, campaign_id) = setup(2).await;

        let work = engine
            .apply_to_campaign("w1", "w1", &campaign_id, "https://proof/1")
            .await
            .unwrap();
        assert_eq!(work.id, campaign_id);
        assert_eq!(work.doc.reward, 25);
        assert_eq!(work.doc.status, WorkStatus::Pending);

        let err = engine
            .apply_to_campaign("w1", "w1", &campaign_id, "https://proof/1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));

        engine
            .apply_to_campaign("w2", "w2", &campaign_id, "https://proof/2")
            .await
            .unwrap();
        let err = engine
            .apply_to_campaign("w3", "w3", &campaign_id, "https://proof/3")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));
        assert_eq!(engine.campaign(&campaign_id).await.unwrap().completed_workers, 2);
    }

    #[tokio::test]
    async fn apply_rejects_owner_and_inactive_campaigns() {
        let (engine, _, campaign_id) = setup(2).await;
        let err = engine
            .apply_to_campaign("owner", "owner", &campaign_id, "https://proof")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));

        engine
            .set_campaign_status("owner", &campaign_id, CampaignStatus::Paused)
            .await
            .unwrap();
        let err = engine
            .apply_to_campaign("w1", "w1", &campaign_id, "https://proof")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn failed_work_creation_releases_slot() {
        let (engine, store, campaign_id) = setup(1).await;
        store.inject_fault_times("works/", StoreFault::CompareAndSwap, 1);

        let err = engine
            .apply_to_campaign("w1", "w1", &campaign_id, "https://proof")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InfrastructureFailure(_)));
        assert_eq!(engine.campaign(&campaign_id).await.unwrap().completed_workers, 0);
    }

    #[tokio::test]
    async fn reject_then_resubmit_then_approve() {
        let (engine, _, campaign_id) = setup(1).await;
        engine
            .apply_to_campaign("w1", "w1", &campaign_id, "https://proof/a")
            .await
            .unwrap();

        let rejected = engine
            .reject_work("admin", &campaign_id, "w1", Some("blurry".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status, WorkStatus::Rejected);
        assert_eq!(rejected.review_note.as_deref(), Some("blurry"));

        let err = engine
            .resubmit_work("w2", &campaign_id, "w1", "https://proof/b")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));

        let resubmitted = engine
            .resubmit_work("w1", &campaign_id, "w1", "https://proof/b")
            .await
            .unwrap();
        assert_eq!(resubmitted.status, WorkStatus::Pending);
        assert!(resubmitted.review_note.is_none());

        let outcome = engine
            .approve_work("admin", &campaign_id, "w1", &campaign_id, 25)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(engine.wallet("w1", "w1").await.unwrap().earned_balance, 25);

        let profile = engine.user_profile("w1", "w1").await.unwrap();
        assert_eq!(profile.earned_money, 25);
        assert_eq!(profile.approved_works, 1);

        let err = engine
            .resubmit_work("w1", &campaign_id, "w1", "https://proof/c")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn wallet_fault_reopens_approved_work() {
        let (engine, store, campaign_id) = setup(1).await;
        engine
            .apply_to_campaign("w1", "w1", &campaign_id, "https://proof")
            .await
            .unwrap();
        store.inject_fault("wallets/w1", StoreFault::CompareAndSwap);

        let outcome = engine
            .approve_work("admin", &campaign_id, "w1", &campaign_id, 25)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TransferOutcome::Declined {
                kind: FailureKind::InfrastructureFailure,
                compensated: true,
                ..
            }
        ));

        let work = engine.work("w1", "w1", &campaign_id).await.unwrap();
        assert_eq!(work.status, WorkStatus::Pending);
        assert!(work.reviewed_at.is_none());
    }

    #[tokio::test]
    async fn approval_requires_admin_and_matching_work_details() {
        let (engine, _, campaign_id) = setup(1).await;
        engine
            .apply_to_campaign("w1", "w1", &campaign_id, "https://proof")
            .await
            .unwrap();

        let err = engine
            .approve_work("w1", &campaign_id, "w1", &campaign_id, 25)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));

        let err = engine
            .approve_work("admin", &campaign_id, "w1", "other", 25)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        let err = engine
            .approve_work("admin", &campaign_id, "w1", &campaign_id, 2_500)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(engine.wallet("w1", "w1").await.unwrap().earned_balance, 0);

        let err = engine
            .approve_work("admin", "missing", "w1", &campaign_id, 25)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
