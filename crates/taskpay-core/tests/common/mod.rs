#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use taskpay_core::{
    CampaignStatus, DocPath, DocumentStore, InMemoryDocumentStore, LedgerEngine,
    MoneyRequestKind, NoopCache, RoleAuthorizer, Wallet, WalletPatch,
};

pub const ADMIN: &str = "admin";

pub fn engine() -> (Arc<LedgerEngine>, Arc<InMemoryDocumentStore>) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let engine = LedgerEngine::new(
        store.clone(),
        Arc::new(NoopCache),
        Arc::new(RoleAuthorizer::with_admins([ADMIN])),
    );
    (Arc::new(engine), store)
}

pub async fn seed_wallet(engine: &LedgerEngine, user_id: &str, wallet: Wallet) {
    engine
        .adjust_wallet(ADMIN, user_id, |_| Some(WalletPatch::from(wallet)))
        .await
        .unwrap();
}

pub async fn wallet(engine: &LedgerEngine, user_id: &str) -> Wallet {
    engine.wallet(ADMIN, user_id).await.unwrap()
}

/// Campaign document with the given budget and plenty of open slots.
pub async fn seed_campaign(
    store: &InMemoryDocumentStore,
    campaign_id: &str,
    creator_id: &str,
    budget: u64,
) {
    store
        .write(
            &DocPath::campaign(campaign_id),
            json!({
                "title": "Seeded campaign",
                "creatorId": creator_id,
                "status": CampaignStatus::Active,
                "rewardPerWorker": 10,
                "totalWorkers": 1000,
                "completedWorkers": 0,
                "totalBudget": budget,
                "remainingBudget": budget,
                "createdAt": "2026-01-01T00:00:00Z"
            }),
        )
        .await
        .unwrap();
}

pub async fn seed_request(
    store: &InMemoryDocumentStore,
    kind: MoneyRequestKind,
    request_id: &str,
    user_id: &str,
    amount: u64,
) {
    store
        .write(
            &DocPath::money_request(kind, request_id),
            json!({
                "userId": user_id,
                "kind": kind,
                "amount": amount,
                "status": "pending",
                "externalReference": "UPI-REF",
                "createdAt": "2026-01-01T00:00:00Z"
            }),
        )
        .await
        .unwrap();
}
