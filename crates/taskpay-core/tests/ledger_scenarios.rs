mod common;

use common::{engine, seed_campaign, seed_request, seed_wallet, wallet, ADMIN};
use taskpay_core::{
    FailureKind, MoneyRequestKind, RequestStatus, Resolution, StoreFault, TransferOutcome, Wallet,
    WalletPatch,
};

#[tokio::test]
async fn scenario_a_update_function_merges_into_wallet() {
    let (engine, _) = engine();
    seed_wallet(
        &engine,
        "u1",
        Wallet {
            earned_balance: 100,
            added_balance: 200,
            pending_add_money: 0,
            total_withdrawn: 50,
        },
    )
    .await;

    let committed = engine
        .adjust_wallet(ADMIN, "u1", |b| {
            Some(WalletPatch::new().earned_balance(b.earned_balance + 50))
        })
        .await
        .unwrap();

    let expected = Wallet {
        earned_balance: 150,
        added_balance: 200,
        pending_add_money: 0,
        total_withdrawn: 50,
    };
    assert_eq!(committed, Some(expected));
    assert_eq!(wallet(&engine, "u1").await, expected);
}

#[tokio::test]
async fn scenario_b_deduction_moves_budget_and_wallet() {
    let (engine, store) = engine();
    seed_campaign(&store, "c1", "u1", 1000).await;
    seed_wallet(
        &engine,
        "u1",
        Wallet {
            added_balance: 800,
            ..Wallet::default()
        },
    )
    .await;

    let outcome = engine
        .deduct_campaign_budget("u1", "c1", 500, "u1")
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(engine.campaign("c1").await.unwrap().remaining_budget, 500);
    assert_eq!(wallet(&engine, "u1").await.added_balance, 300);
}

#[tokio::test]
async fn scenario_c_oversized_deduction_aborts_without_touching_wallet() {
    let (engine, store) = engine();
    seed_campaign(&store, "c1", "u1", 1000).await;
    seed_wallet(
        &engine,
        "u1",
        Wallet {
            added_balance: 5000,
            ..Wallet::default()
        },
    )
    .await;

    let outcome = engine
        .deduct_campaign_budget("u1", "c1", 1500, "u1")
        .await
        .unwrap();

    assert!(!outcome.is_success());
    assert_eq!(outcome.failure_kind(), Some(FailureKind::PreconditionFailed));
    assert_eq!(engine.campaign("c1").await.unwrap().remaining_budget, 1000);
    assert_eq!(wallet(&engine, "u1").await.added_balance, 5000);
}

#[tokio::test]
async fn scenario_d_unfunded_withdrawal_reverts_request_to_pending() {
    let (engine, store) = engine();
    seed_wallet(
        &engine,
        "u1",
        Wallet {
            earned_balance: 200,
            ..Wallet::default()
        },
    )
    .await;
    seed_request(&store, MoneyRequestKind::Withdrawal, "r1", "u1", 500).await;

    let outcome = engine
        .process_money_request(
            ADMIN,
            "r1",
            MoneyRequestKind::Withdrawal,
            "u1",
            500,
            Resolution::Approved,
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        TransferOutcome::Declined {
            kind: FailureKind::PreconditionFailed,
            compensated: true,
            ..
        }
    ));
    let request = engine
        .money_request(ADMIN, MoneyRequestKind::Withdrawal, "r1")
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert!(request.processed_by.is_none());
    assert_eq!(wallet(&engine, "u1").await.earned_balance, 200);
}

#[tokio::test]
async fn scenario_e_add_money_approval_clamps_pending() {
    let (engine, store) = engine();
    seed_wallet(
        &engine,
        "u1",
        Wallet {
            added_balance: 200,
            pending_add_money: 50,
            ..Wallet::default()
        },
    )
    .await;
    seed_request(&store, MoneyRequestKind::AddMoney, "r1", "u1", 500).await;

    let outcome = engine
        .process_money_request(
            ADMIN,
            "r1",
            MoneyRequestKind::AddMoney,
            "u1",
            500,
            Resolution::Approved,
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    let wallet = wallet(&engine, "u1").await;
    assert_eq!(wallet.added_balance, 700);
    assert_eq!(wallet.pending_add_money, 0);
}

#[tokio::test]
async fn forced_wallet_failure_restores_campaign_budget() {
    let (engine, store) = engine();
    seed_campaign(&store, "c1", "u1", 1000).await;
    seed_wallet(
        &engine,
        "u1",
        Wallet {
            added_balance: 800,
            ..Wallet::default()
        },
    )
    .await;
    store.inject_fault("wallets/u1", StoreFault::CompareAndSwap);

    let outcome = engine
        .deduct_campaign_budget("u1", "c1", 500, "u1")
        .await
        .unwrap();

    assert!(!outcome.is_success());
    assert_eq!(engine.campaign("c1").await.unwrap().remaining_budget, 1000);
    store.clear_faults();
    assert_eq!(wallet(&engine, "u1").await.added_balance, 800);
}

#[tokio::test]
async fn forced_wallet_failure_reopens_add_money_request() {
    let (engine, store) = engine();
    seed_request(&store, MoneyRequestKind::AddMoney, "r1", "u1", 100).await;
    store.inject_fault("wallets/u1", StoreFault::CompareAndSwap);

    let outcome = engine
        .process_money_request(
            ADMIN,
            "r1",
            MoneyRequestKind::AddMoney,
            "u1",
            100,
            Resolution::Approved,
        )
        .await
        .unwrap();

    assert_eq!(
        outcome.failure_kind(),
        Some(FailureKind::InfrastructureFailure)
    );
    let request = engine
        .money_request(ADMIN, MoneyRequestKind::AddMoney, "r1")
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
}

#[tokio::test]
async fn work_is_approved_and_credited_once() {
    let (engine, store) = engine();
    seed_campaign(&store, "c1", "owner", 1000).await;
    engine
        .apply_to_campaign("w1", "w1", "c1", "https://proof")
        .await
        .unwrap();

    let first = engine
        .approve_work(ADMIN, "c1", "w1", "c1", 10)
        .await
        .unwrap();
    let second = engine
        .approve_work(ADMIN, "c1", "w1", "c1", 10)
        .await
        .unwrap();

    assert!(first.is_success());
    assert_eq!(second.failure_kind(), Some(FailureKind::PreconditionFailed));
    assert_eq!(wallet(&engine, "w1").await.earned_balance, 10);

    let err = engine
        .reject_work(ADMIN, "c1", "w1", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::PreconditionFailed);
}
