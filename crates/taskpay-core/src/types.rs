use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Monetary amount in minor units. Unsigned, so balances cannot go negative.
pub type Amount = u64;

/// Per-user wallet stored at `wallets/{uid}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Wallet {
    /// Earned from approved work; the only withdrawable balance.
    pub earned_balance: Amount,
    /// Deposited by the user; spendable on campaigns only.
    pub added_balance: Amount,
    /// Deposits awaiting admin confirmation.
    pub pending_add_money: Amount,
    /// Lifetime approved withdrawals. Never decreases.
    pub total_withdrawn: Amount,
}

impl Wallet {
    pub fn get(&self, field: BalanceField) -> Amount {
        match field {
            BalanceField::EarnedBalance => self.earned_balance,
            BalanceField::AddedBalance => self.added_balance,
            BalanceField::PendingAddMoney => self.pending_add_money,
            BalanceField::TotalWithdrawn => self.total_withdrawn,
        }
    }

    pub fn set(&mut self, field: BalanceField, value: Amount) {
        match field {
            BalanceField::EarnedBalance => self.earned_balance = value,
            BalanceField::AddedBalance => self.added_balance = value,
            BalanceField::PendingAddMoney => self.pending_add_money = value,
            BalanceField::TotalWithdrawn => self.total_withdrawn = value,
        }
    }

    /// Add every delta to its field, clamping each result at zero.
    pub fn apply_deltas(&self, deltas: &BalanceDeltas) -> Wallet {
        let mut next = *self;
        for (field, delta) in deltas.iter() {
            next.set(field, self.get(field).saturating_add_signed(delta));
        }
        next
    }
}

/// Partial wallet update merged over the current snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earned_balance: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_balance: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_add_money: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_withdrawn: Option<Amount>,
}

impl WalletPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn earned_balance(mut self, value: Amount) -> Self {
        self.earned_balance = Some(value);
        self
    }

    pub fn added_balance(mut self, value: Amount) -> Self {
        self.added_balance = Some(value);
        self
    }

    pub fn pending_add_money(mut self, value: Amount) -> Self {
        self.pending_add_money = Some(value);
        self
    }

    pub fn total_withdrawn(mut self, value: Amount) -> Self {
        self.total_withdrawn = Some(value);
        self
    }

    /// `{...current, ...patch}`.
    pub fn apply_to(&self, current: &Wallet) -> Wallet {
        Wallet {
            earned_balance: self.earned_balance.unwrap_or(current.earned_balance),
            added_balance: self.added_balance.unwrap_or(current.added_balance),
            pending_add_money: self.pending_add_money.unwrap_or(current.pending_add_money),
            total_withdrawn: self.total_withdrawn.unwrap_or(current.total_withdrawn),
        }
    }
}

impl From<Wallet> for WalletPatch {
    fn from(wallet: Wallet) -> Self {
        Self {
            earned_balance: Some(wallet.earned_balance),
            added_balance: Some(wallet.added_balance),
            pending_add_money: Some(wallet.pending_add_money),
            total_withdrawn: Some(wallet.total_withdrawn),
        }
    }
}

/// Named wallet balance field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BalanceField {
    EarnedBalance,
    AddedBalance,
    PendingAddMoney,
    TotalWithdrawn,
}

/// Signed per-field deltas applied together with a transaction record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDeltas(BTreeMap<BalanceField, i64>);

impl BalanceDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates when the same field is named twice.
    pub fn with(mut self, field: BalanceField, delta: i64) -> Self {
        let entry = self.0.entry(field).or_insert(0);
        *entry = entry.saturating_add(delta);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BalanceField, i64)> + '_ {
        self.0.iter().map(|(field, delta)| (*field, *delta))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Banned,
    Failed,
}

impl CampaignStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Banned => "banned",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Banned | Self::Failed)
    }
}

/// Funded campaign stored at `campaigns/{campaignId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub title: String,
    pub creator_id: String,
    pub status: CampaignStatus,
    pub reward_per_worker: Amount,
    pub total_workers: u32,
    #[serde(default)]
    pub completed_workers: u32,
    pub total_budget: Amount,
    pub remaining_budget: Amount,
    pub created_at: DateTime<Utc>,
    /// Presentation fields owned by other writers; carried through CAS rewrites untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Campaign {
    pub fn from_draft(creator_id: impl Into<String>, draft: &CampaignDraft, budget: Amount) -> Self {
        Self {
            title: draft.title.clone(),
            creator_id: creator_id.into(),
            status: CampaignStatus::Active,
            reward_per_worker: draft.reward_per_worker,
            total_workers: draft.total_workers,
            completed_workers: 0,
            total_budget: budget,
            remaining_budget: budget,
            created_at: Utc::now(),
            extra: Map::new(),
        }
    }

    pub fn has_open_slots(&self) -> bool {
        self.completed_workers < self.total_workers
    }
}

/// Caller input for launching a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDraft {
    pub title: String,
    pub reward_per_worker: Amount,
    pub total_workers: u32,
}

impl CampaignDraft {
    pub fn new(title: impl Into<String>, reward_per_worker: Amount, total_workers: u32) -> Self {
        Self {
            title: title.into(),
            reward_per_worker,
            total_workers,
        }
    }

    /// `None` on overflow.
    pub fn budget(&self) -> Option<Amount> {
        self.reward_per_worker
            .checked_mul(Amount::from(self.total_workers))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Approved,
    Rejected,
}

impl WorkStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Work submission stored at `works/{uid}/{workId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSubmission {
    pub user_id: String,
    pub campaign_id: String,
    pub status: WorkStatus,
    pub reward: Amount,
    pub proof_url: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_note: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    AddMoney,
    Withdrawal,
    Earning,
    CampaignSpend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
    /// Set when the paired wallet update never landed.
    Failed,
}

/// Append-only record stored at `transactions/{uid}/{transactionId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Amount,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl TransactionRecord {
    pub fn new(kind: TransactionKind, amount: Amount, status: TransactionStatus) -> Self {
        Self {
            kind,
            amount,
            status,
            created_at: Utc::now(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Admin queue a money request lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyRequestKind {
    AddMoney,
    Withdrawal,
}

impl MoneyRequestKind {
    /// Path segment under `adminRequests/`.
    pub fn namespace(self) -> &'static str {
        match self {
            Self::AddMoney => "addMoney",
            Self::Withdrawal => "withdrawals",
        }
    }
}

impl fmt::Display for MoneyRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for MoneyRequestKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "addMoney" | "add-money" | "add_money" => Ok(Self::AddMoney),
            "withdrawals" | "withdrawal" => Ok(Self::Withdrawal),
            other => Err(format!(
                "unknown request kind '{other}'; expected add-money or withdrawals"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Admin decision on a pending money request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approved,
    Rejected,
}

impl From<Resolution> for RequestStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Approved => Self::Approved,
            Resolution::Rejected => Self::Rejected,
        }
    }
}

impl From<Resolution> for TransactionStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Approved => Self::Approved,
            Resolution::Rejected => Self::Rejected,
        }
    }
}

/// Add-money or withdrawal request awaiting an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyRequest {
    pub user_id: String,
    pub kind: MoneyRequestKind,
    pub amount: Amount,
    pub status: RequestStatus,
    /// Claimed UPI transaction id (add-money) or payout UPI id (withdrawal). Not verified.
    pub external_reference: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_by: Option<String>,
}

/// Aggregate counters on `users/{uid}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub earned_money: Amount,
    #[serde(default)]
    pub approved_works: u64,
    #[serde(default)]
    pub total_withdrawn: Amount,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Document paired with the id it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyed<T> {
    pub id: String,
    #[serde(flatten)]
    pub doc: T,
}

impl<T> Keyed<T> {
    pub fn new(id: impl Into<String>, doc: T) -> Self {
        Self { id: id.into(), doc }
    }
}

/// Result of a multi-document transfer.
///
/// `Declined` is the boolean-failure path: nothing committed on the primary,
/// or the primary was compensated after the secondary leg failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransferOutcome {
    Completed,
    Declined {
        kind: FailureKind,
        detail: String,
        compensated: bool,
    },
}

impl TransferOutcome {
    pub fn declined(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Declined {
            kind,
            detail: detail.into(),
            compensated: false,
        }
    }

    pub fn compensated(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Declined {
            kind,
            detail: detail.into(),
            compensated: true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Completed => None,
            Self::Declined { kind, .. } => Some(*kind),
        }
    }
}
