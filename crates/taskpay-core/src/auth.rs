use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;

/// Elevated role an operation may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
}

/// Authorization check consulted before any ledger mutation.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `actor_id` may act on a resource owned by `target_owner_id`.
    async fn authorize(
        &self,
        actor_id: &str,
        target_owner_id: &str,
        required_role: Option<Role>,
    ) -> bool;
}

/// Owner-or-admin authorizer backed by an in-process admin set.
#[derive(Debug, Default)]
pub struct RoleAuthorizer {
    admins: RwLock<HashSet<String>>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admins<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: RwLock::new(admins.into_iter().map(Into::into).collect()),
        }
    }

    pub fn grant_admin(&self, user_id: impl Into<String>) {
        if let Ok(mut admins) = self.admins.write() {
            admins.insert(user_id.into());
        }
    }

    pub fn revoke_admin(&self, user_id: &str) {
        if let Ok(mut admins) = self.admins.write() {
            admins.remove(user_id);
        }
    }

    /// Fails closed when the lock is poisoned.
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins
            .read()
            .map(|admins| admins.contains(user_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn authorize(
        &self,
        actor_id: &str,
        target_owner_id: &str,
        required_role: Option<Role>,
    ) -> bool {
        if actor_id.is_empty() {
            return false;
        }
        match required_role {
            Some(Role::Admin) => self.is_admin(actor_id),
            None => actor_id == target_owner_id || self.is_admin(actor_id),
        }
    }
}
