use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use super::{KeyValueStore, StoreError};

/// Process-local backend. Suitable for a single replica and for tests.
/// Unbounded; entries leave only through expiry or `delete`.
pub struct MemoryStore {
    entries: Cache<String, StoredValue>,
}

#[derive(Clone, Debug)]
struct StoredValue {
    value: Arc<str>,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: &str, ttl: Duration) -> Result<Self, StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl(ttl));
        }
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        Ok(Self {
            value: Arc::from(value),
            expires_at,
        })
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Evicts each entry at its own deadline.
struct PerEntryExpiry;

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(updated_at))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let entries = Cache::builder().expire_after(PerEntryExpiry).build();
        Self { entries }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .get(key)
            .await
            .filter(StoredValue::is_live)
            .map(|stored| stored.value.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let stored = StoredValue::new(value, ttl)?;
        self.entries.insert(key.to_string(), stored).await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let candidate = StoredValue::new(value, ttl)?;
        // The entry API serializes concurrent initializers for one key.
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with_if(async move { candidate }, |existing| !existing.is_live())
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .remove(key)
            .await
            .is_some_and(|stored| stored.is_live()))
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.entries.run_pending_tasks().await;
        Ok(0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
