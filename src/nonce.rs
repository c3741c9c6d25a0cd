//! Cached nonce allocation for the shared operator account.
//!
//! Querying the node for every drip races with its own mempool bookkeeping,
//! so the next nonce is cached briefly in the keyed store. The cache is a
//! best-effort accelerator: a short ttl and explicit invalidation after a
//! failed submission both fall back to the node's pending count.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::address::EthAddress;
use crate::rpc::{ChainRpc, RpcError};
use crate::store::{KeyValueStore, StoreError, nonce_key};

pub const NONCE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("nonce {0} cannot advance")]
    Exhausted(u64),
}

#[derive(Clone)]
pub struct NonceSequencer {
    store: Arc<dyn KeyValueStore>,
    rpc: Arc<dyn ChainRpc>,
    operator: EthAddress,
    ttl: Duration,
}

impl NonceSequencer {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        rpc: Arc<dyn ChainRpc>,
        operator: EthAddress,
        ttl: Duration,
    ) -> Self {
        assert!(!operator.is_zero(), "Operator address must be set");
        assert!(!ttl.is_zero(), "Nonce ttl must be positive");
        Self {
            store,
            rpc,
            operator,
            ttl,
        }
    }

    /// Cached next nonce, or the operator's pending count on a miss.
    pub async fn get_nonce(&self, network_id: u64) -> Result<u64, NonceError> {
        let key = nonce_key(network_id);
        if let Some(cached) = self.store.get(&key).await? {
            match cached.parse::<u64>() {
                Ok(nonce) => {
                    debug!(network_id, nonce, "Using cached nonce");
                    return Ok(nonce);
                }
                Err(_) => warn!(network_id, cached = %cached, "Ignoring unparseable cached nonce"),
            }
        }

        let nonce = self.rpc.transaction_count(&self.operator).await?;
        debug!(network_id, nonce, "Derived nonce from pending transaction count");
        Ok(nonce)
    }

    /// Hands `nonce + 1` to whoever allocates next.
    pub async fn reserve_next(&self, network_id: u64, nonce: u64) -> Result<(), NonceError> {
        let next = nonce.checked_add(1).ok_or(NonceError::Exhausted(nonce))?;
        self.store
            .set_with_ttl(&nonce_key(network_id), &next.to_string(), self.ttl)
            .await?;
        Ok(())
    }

    /// Drops the cached value so the next allocation re-reads the node.
    pub async fn invalidate(&self, network_id: u64) -> Result<bool, NonceError> {
        let removed = self.store.delete(&nonce_key(network_id)).await?;
        debug!(network_id, removed, "Invalidated cached nonce");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{FakeChain, TEST_OPERATOR_ADDRESS};

    const NETWORK: u64 = 30103;

    fn sequencer(chain: Arc<FakeChain>) -> (NonceSequencer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let operator = EthAddress::parse(TEST_OPERATOR_ADDRESS).unwrap();
        let sequencer = NonceSequencer::new(store.clone(), chain, operator, NONCE_TTL);
        (sequencer, store)
    }

    #[tokio::test]
    async fn cache_miss_reads_pending_count() {
        let chain = Arc::new(FakeChain::new(17, 1));
        let (sequencer, _) = sequencer(chain.clone());
        assert_eq!(sequencer.get_nonce(NETWORK).await.unwrap(), 17);
        assert_eq!(chain.count_queries(), 1);
    }

    #[tokio::test]
    async fn allocations_advance_monotonically_from_cache() {
        let chain = Arc::new(FakeChain::new(5, 1));
        let (sequencer, _) = sequencer(chain.clone());
        let mut previous = None;
        for _ in 0..4 {
            let nonce = sequencer.get_nonce(NETWORK).await.unwrap();
            if let Some(prev) = previous {
                assert_eq!(nonce, prev + 1);
            }
            sequencer.reserve_next(NETWORK, nonce).await.unwrap();
            previous = Some(nonce);
        }
        assert_eq!(previous, Some(8));
        assert_eq!(chain.count_queries(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_ground_truth() {
        let chain = Arc::new(FakeChain::new(3, 1));
        let (sequencer, _) = sequencer(chain.clone());
        sequencer.reserve_next(NETWORK, 40).await.unwrap();
        assert_eq!(sequencer.get_nonce(NETWORK).await.unwrap(), 41);

        chain.set_pending_count(9);
        assert!(sequencer.invalidate(NETWORK).await.unwrap());
        assert_eq!(sequencer.get_nonce(NETWORK).await.unwrap(), 9);
        assert!(!sequencer.invalidate(NETWORK).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_cache_falls_back_to_node() {
        let chain = Arc::new(FakeChain::new(12, 1));
        let (sequencer, store) = sequencer(chain.clone());
        store
            .set_with_ttl(&nonce_key(NETWORK), "garbage", NONCE_TTL)
            .await
            .unwrap();
        assert_eq!(sequencer.get_nonce(NETWORK).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn networks_are_cached_independently() {
        let chain = Arc::new(FakeChain::new(0, 1));
        let (sequencer, _) = sequencer(chain.clone());
        sequencer.reserve_next(1, 10).await.unwrap();
        assert_eq!(sequencer.get_nonce(1).await.unwrap(), 11);
        assert_eq!(sequencer.get_nonce(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cached_nonce_expires() {
        let chain = Arc::new(FakeChain::new(2, 1));
        let store = Arc::new(MemoryStore::new());
        let operator = EthAddress::parse(TEST_OPERATOR_ADDRESS).unwrap();
        let sequencer =
            NonceSequencer::new(store, chain, operator, Duration::from_millis(40));
        sequencer.reserve_next(NETWORK, 50).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(sequencer.get_nonce(NETWORK).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn maximal_nonce_cannot_be_reserved() {
        let (sequencer, store) = sequencer(Arc::new(FakeChain::new(0, 1)));
        let err = sequencer.reserve_next(NETWORK, u64::MAX).await.unwrap_err();
        assert!(matches!(err, NonceError::Exhausted(u64::MAX)));
        assert!(store.get(&nonce_key(NETWORK)).await.unwrap().is_none());
    }
}
