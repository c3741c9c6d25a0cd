use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::claim::ClaimService;
use crate::identity::IdentityResolver;
use crate::store::KeyValueStore;

#[derive(Clone)]
pub struct AppState {
    pub claims: Arc<ClaimService>,
    pub identities: Arc<dyn IdentityResolver>,
    pub store: Arc<dyn KeyValueStore>,
    pub info: Arc<FaucetInfo>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        claims: Arc<ClaimService>,
        identities: Arc<dyn IdentityResolver>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let executor = claims.executor();
        let info = FaucetInfo {
            operator: executor.operator().to_checksum(),
            network_id: executor.network_id(),
            amount_wei: executor.amount().to_string(),
            claim_window_seconds: claims.ledger().window().as_secs(),
        };
        assert!(info.claim_window_seconds > 0, "Claim window must be configured");
        Self {
            claims,
            identities,
            store,
            info: Arc::new(info),
            start_time: Instant::now(),
        }
    }
}

/// Public faucet parameters, fixed for the lifetime of the process.
#[derive(Debug, Clone, Serialize)]
pub struct FaucetInfo {
    pub operator: String,
    pub network_id: u64,
    pub amount_wei: String,
    pub claim_window_seconds: u64,
}
