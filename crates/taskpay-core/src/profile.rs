//! User-profile aggregate counters at `users/{uid}`.

use crate::engine::{require_id, LedgerEngine};
use crate::error::LedgerError;
use crate::paths::{cache_keys, DocPath};
use crate::store::{read_doc, transact};
use crate::types::UserProfile;
use tracing::warn;

impl LedgerEngine {
    /// Best-effort aggregate bump after a committed transfer. Failures are logged only.
    pub(crate) async fn bump_profile<F>(&self, user_id: &str, mut bump: F)
    where
        F: FnMut(&mut UserProfile) + Send,
    {
        let path = DocPath::user_profile(user_id);
        let result = transact::<UserProfile, _>(self.store.as_ref(), &path, |current| {
            let mut profile = current.unwrap_or_default();
            bump(&mut profile);
            Some(profile)
        })
        .await;

        match result {
            Ok(Some(_)) => self.cache.invalidate(&cache_keys::profile(user_id)).await,
            Ok(None) => warn!(path = %path, "profile aggregate update did not commit"),
            Err(e) => warn!(path = %path, error = %e, "profile aggregate update failed"),
        }
    }

    pub async fn user_profile(
        &self,
        actor_id: &str,
        user_id: &str,
    ) -> Result<UserProfile, LedgerError> {
        require_id("user id", user_id)?;
        let path = DocPath::user_profile(user_id);
        self.require(actor_id, user_id, None, path.as_str()).await?;
        Ok(read_doc::<UserProfile>(self.store.as_ref(), &path)
            .await?
            .unwrap_or_default())
    }
}
