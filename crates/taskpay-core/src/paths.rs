//! Document paths and cache keys shared with external collaborators.
//!
//! The layout is fixed: UI code and reporting jobs read the same paths.

use crate::types::MoneyRequestKind;
use std::fmt;

/// Slash-separated document path inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn wallet(user_id: &str) -> Self {
        Self(format!("wallets/{user_id}"))
    }

    pub fn campaigns() -> Self {
        Self("campaigns".to_string())
    }

    pub fn campaign(campaign_id: &str) -> Self {
        Self::campaigns().child(campaign_id)
    }

    pub fn works(user_id: &str) -> Self {
        Self(format!("works/{user_id}"))
    }

    pub fn work(user_id: &str, work_id: &str) -> Self {
        Self::works(user_id).child(work_id)
    }

    pub fn transactions(user_id: &str) -> Self {
        Self(format!("transactions/{user_id}"))
    }

    pub fn transaction(user_id: &str, transaction_id: &str) -> Self {
        Self::transactions(user_id).child(transaction_id)
    }

    pub fn money_requests(kind: MoneyRequestKind) -> Self {
        Self(format!("adminRequests/{}", kind.namespace()))
    }

    pub fn money_request(kind: MoneyRequestKind, request_id: &str) -> Self {
        Self::money_requests(kind).child(request_id)
    }

    pub fn user_profile(user_id: &str) -> Self {
        Self(format!("users/{user_id}"))
    }

    pub fn child(&self, id: &str) -> Self {
        Self(format!("{}/{}", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical cache keys invalidated after successful mutations.
pub mod cache_keys {
    use crate::types::MoneyRequestKind;

    pub const ALL_CAMPAIGNS: &str = "campaigns:all";

    pub fn wallet(user_id: &str) -> String {
        format!("wallet:{user_id}")
    }

    pub fn campaign(campaign_id: &str) -> String {
        format!("campaign:{campaign_id}")
    }

    pub fn works(user_id: &str) -> String {
        format!("works:{user_id}")
    }

    pub fn transactions(user_id: &str) -> String {
        format!("transactions:{user_id}")
    }

    pub fn requests(kind: MoneyRequestKind) -> String {
        format!("requests:{}", kind.namespace())
    }

    pub fn profile(user_id: &str) -> String {
        format!("profile:{user_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_store_namespace() {
        assert_eq!(DocPath::wallet("u1").as_str(), "wallets/u1");
        assert_eq!(DocPath::campaign("c1").as_str(), "campaigns/c1");
        assert_eq!(DocPath::work("u1", "w1").as_str(), "works/u1/w1");
        assert_eq!(DocPath::transaction("u1", "t1").as_str(), "transactions/u1/t1");
        assert_eq!(
            DocPath::money_request(MoneyRequestKind::AddMoney, "r1").as_str(),
            "adminRequests/addMoney/r1"
        );
        assert_eq!(
            DocPath::money_request(MoneyRequestKind::Withdrawal, "r2").as_str(),
            "adminRequests/withdrawals/r2"
        );
    }

    #[test]
    fn cache_keys_are_resource_scoped() {
        assert_eq!(cache_keys::wallet("u1"), "wallet:u1");
        assert_eq!(cache_keys::works("u1"), "works:u1");
        assert_eq!(cache_keys::ALL_CAMPAIGNS, "campaigns:all");
    }
}
