//! Test doubles shared by unit tests across modules.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::address::EthAddress;
use crate::alerts::AlertSink;
use crate::claim::ClaimService;
use crate::drip::DripExecutor;
use crate::drip::transaction::OperatorSigner;
use crate::identity::{AuthError, Identity, IdentityResolver};
use crate::ledger::{CLAIM_WINDOW, ClaimLedger};
use crate::nonce::{NONCE_TTL, NonceSequencer};
use crate::rpc::{ChainRpc, RpcError};
use crate::state::AppState;
use crate::store::{KeyValueStore, MemoryStore, StoreError};

/// Scriptable chain endpoint that records what it was asked to do.
pub struct FakeChain {
    pub pending_count: Mutex<u64>,
    pub gas_price: Mutex<u128>,
    pub fail_send_with: Mutex<Option<String>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub count_queries: AtomicUsize,
    pub call_responses: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl FakeChain {
    pub fn new(pending_count: u64, gas_price: u128) -> Self {
        Self {
            pending_count: Mutex::new(pending_count),
            gas_price: Mutex::new(gas_price),
            fail_send_with: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            count_queries: AtomicUsize::new(0),
            call_responses: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_sends(&self, reason: &str) {
        *self.fail_send_with.lock().unwrap() = Some(reason.to_string());
    }

    pub fn set_pending_count(&self, count: u64) {
        *self.pending_count.lock().unwrap() = count;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn count_queries(&self) -> usize {
        self.count_queries.load(Ordering::SeqCst)
    }

    /// Answers `eth_call` with `output` whenever calldata equals `data`.
    pub fn respond_to_call(&self, data: Vec<u8>, output: Vec<u8>) {
        self.call_responses.lock().unwrap().insert(data, output);
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn transaction_count(&self, _account: &EthAddress) -> Result<u64, RpcError> {
        self.count_queries.fetch_add(1, Ordering::SeqCst);
        Ok(*self.pending_count.lock().unwrap())
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        if let Some(reason) = self.fail_send_with.lock().unwrap().clone() {
            return Err(RpcError::Rejected(reason));
        }
        self.sent.lock().unwrap().push(raw.to_vec());
        let hash = keccak_hash::keccak(raw);
        Ok(format!("0x{}", hex::encode(hash.0)))
    }

    async fn call(&self, _to: &EthAddress, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        Ok(self
            .call_responses
            .lock()
            .unwrap()
            .get(data)
            .cloned()
            .unwrap_or_default())
    }
}

/// Memory store that counts mutating calls per key.
pub struct CountingStore {
    inner: MemoryStore,
    writes: Mutex<HashMap<String, usize>>,
    deletes: Mutex<HashMap<String, usize>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            writes: Mutex::new(HashMap::new()),
            deletes: Mutex::new(HashMap::new()),
        }
    }

    pub fn writes_to(&self, key: &str) -> usize {
        self.writes.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn deletes_of(&self, key: &str) -> usize {
        self.deletes.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Writes plus deletes across every key.
    pub fn mutations(&self) -> usize {
        let writes: usize = self.writes.lock().unwrap().values().sum();
        let deletes: usize = self.deletes.lock().unwrap().values().sum();
        writes + deletes
    }

    fn bump(map: &Mutex<HashMap<String, usize>>, key: &str) {
        *map.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        Self::bump(&self.writes, key);
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let written = self.inner.set_if_absent(key, value, ttl).await?;
        if written {
            Self::bump(&self.writes, key);
        }
        Ok(written)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Self::bump(&self.deletes, key);
        self.inner.delete(key).await
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.inner.purge_expired().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "counting"
    }
}

/// Trusts an `x-test-identity: <id>` header. `x-test-provider-down` makes
/// the provider unreachable.
pub struct HeaderIdentityResolver;

pub const TEST_IDENTITY_HEADER: &str = "x-test-identity";
pub const TEST_PROVIDER_DOWN_HEADER: &str = "x-test-provider-down";

#[async_trait]
impl IdentityResolver for HeaderIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        if headers.contains_key(TEST_PROVIDER_DOWN_HEADER) {
            return Err(AuthError::Provider("connection refused".to_string()));
        }
        headers
            .get(TEST_IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|id| Identity::new(id, "tester"))
            .ok_or(AuthError::Unauthenticated)
    }
}

/// Operator key `0x..01`, whose address is well known.
pub const TEST_OPERATOR_KEY: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000001";
pub const TEST_OPERATOR_ADDRESS: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";

pub const TEST_NETWORK: u64 = 30103;
pub const TEST_AMOUNT: u128 = 1_000_000_000_000_000_000;
pub const TEST_ALLOWLISTED: &str = "1078014622525988864";

/// Full application state over the given doubles, with header-based auth.
/// Alerts go to a queue nobody drains.
pub fn app_state(chain: Arc<FakeChain>, store: Arc<CountingStore>) -> AppState {
    let signer = OperatorSigner::from_hex(TEST_OPERATOR_KEY).unwrap();
    let nonces = NonceSequencer::new(store.clone(), chain.clone(), signer.address(), NONCE_TTL);
    let (sink, _alerts) = AlertSink::channel(8);
    let executor = DripExecutor::new(chain, nonces, signer, sink, TEST_NETWORK, TEST_AMOUNT, None);
    let ledger = ClaimLedger::new(store.clone(), CLAIM_WINDOW);
    let allowlist = HashSet::from([TEST_ALLOWLISTED.to_string()]);
    let claims = Arc::new(ClaimService::new(ledger, executor, allowlist));
    AppState::new(claims, Arc::new(HeaderIdentityResolver), store)
}
