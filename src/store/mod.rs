//! Keyed, expiring record store shared by every request.
//!
//! The claim ledger and the nonce sequencer never lock in-process; all
//! cross-request coordination happens through the per-key primitives below,
//! which each backend must implement atomically for a single key.

use std::time::Duration;

use async_trait::async_trait;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

pub const CLAIM_NAMESPACE: &str = "claim";
pub const NONCE_NAMESPACE: &str = "nonce";

/// Longest key accepted by either backend (matches the `kv_entries` column)
pub const MAX_KEY_LEN: usize = 256;

pub fn claim_key(identity_id: &str) -> String {
    namespaced(CLAIM_NAMESPACE, identity_id)
}

pub fn nonce_key(network_id: u64) -> String {
    namespaced(NONCE_NAMESPACE, &network_id.to_string())
}

fn namespaced(namespace: &str, id: &str) -> String {
    assert!(!id.is_empty(), "Store key identifier cannot be empty");
    let key = format!("{namespace}:{id}");
    assert!(key.len() <= MAX_KEY_LEN, "Store key exceeds column bound");
    key
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("ttl of {0:?} cannot be represented")]
    InvalidTtl(Duration),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Live value for `key`; expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally writes `value` with a fresh expiry.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Writes only when no live entry exists. Returns whether this call wrote.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Removes the entry. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Drops expired entries, returning how many were removed when known.
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend_name(&self) -> &'static str;
}
