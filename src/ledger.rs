//! Per-identity claim windows kept in the shared keyed store.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::identity::Identity;
use crate::store::{KeyValueStore, StoreError, claim_key};

/// One drip per identity per rolling day.
pub const CLAIM_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

const CLAIMED_MARKER: &str = "true";

#[derive(Clone)]
pub struct ClaimLedger {
    store: Arc<dyn KeyValueStore>,
    window: Duration,
}

impl ClaimLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, window: Duration) -> Self {
        assert!(!window.is_zero(), "Claim window must be positive");
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn has_claimed(&self, identity: &Identity) -> Result<bool, StoreError> {
        let claimed = self.store.get(&claim_key(identity.id())).await?.is_some();
        debug!(identity = identity.id(), claimed, "Checked claim window");
        Ok(claimed)
    }

    /// Starts a fresh window for `identity`, replacing whatever was stored.
    pub async fn mark_claimed(&self, identity: &Identity) -> Result<(), StoreError> {
        self.store
            .set_with_ttl(&claim_key(identity.id()), CLAIMED_MARKER, self.window)
            .await
    }

    /// Atomically opens a window unless one is already live. Returns `false`
    /// when another request holds the window.
    pub async fn try_claim(&self, identity: &Identity) -> Result<bool, StoreError> {
        self.store
            .set_if_absent(&claim_key(identity.id()), CLAIMED_MARKER, self.window)
            .await
    }

    /// Gives a reserved window back after a drip that did not go out.
    pub async fn release(&self, identity: &Identity) -> Result<bool, StoreError> {
        self.store.delete(&claim_key(identity.id())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger(window: Duration) -> ClaimLedger {
        ClaimLedger::new(Arc::new(MemoryStore::new()), window)
    }

    fn alice() -> Identity {
        Identity::new("1078014622525988864", "alice").unwrap()
    }

    #[tokio::test]
    async fn mark_then_check_within_window() {
        let ledger = ledger(CLAIM_WINDOW);
        assert!(!ledger.has_claimed(&alice()).await.unwrap());
        ledger.mark_claimed(&alice()).await.unwrap();
        assert!(ledger.has_claimed(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn window_expires() {
        let ledger = ledger(Duration::from_millis(40));
        ledger.mark_claimed(&alice()).await.unwrap();
        assert!(ledger.has_claimed(&alice()).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!ledger.has_claimed(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn try_claim_is_exclusive_until_released() {
        let ledger = ledger(CLAIM_WINDOW);
        assert!(ledger.try_claim(&alice()).await.unwrap());
        assert!(!ledger.try_claim(&alice()).await.unwrap());
        assert!(ledger.release(&alice()).await.unwrap());
        assert!(!ledger.has_claimed(&alice()).await.unwrap());
        assert!(ledger.try_claim(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn identities_do_not_share_windows() {
        let ledger = ledger(CLAIM_WINDOW);
        let bob = Identity::new("42", "bob").unwrap();
        ledger.mark_claimed(&alice()).await.unwrap();
        assert!(!ledger.has_claimed(&bob).await.unwrap());
    }
}
