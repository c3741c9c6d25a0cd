//! Claim orchestration: one drip per identity per window.

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::address::{AddressError, Recipient};
use crate::drip::{DripError, DripExecutor, DripReceipt};
use crate::identity::Identity;
use crate::ledger::ClaimLedger;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("Already claimed in 24h window")]
    AlreadyClaimed,

    #[error(transparent)]
    Drip(#[from] DripError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ClaimService {
    ledger: ClaimLedger,
    executor: DripExecutor,
    allowlist: HashSet<String>,
}

impl ClaimService {
    pub fn new(ledger: ClaimLedger, executor: DripExecutor, allowlist: HashSet<String>) -> Self {
        Self {
            ledger,
            executor,
            allowlist,
        }
    }

    pub fn ledger(&self) -> &ClaimLedger {
        &self.ledger
    }

    pub fn executor(&self) -> &DripExecutor {
        &self.executor
    }

    /// Allow-listed identities may drip repeatedly and never leave a record.
    pub fn is_allowlisted(&self, identity: &Identity) -> bool {
        self.allowlist.contains(identity.id())
    }

    pub async fn status(&self, identity: &Identity) -> Result<bool, ClaimError> {
        Ok(self.ledger.has_claimed(identity).await?)
    }

    pub async fn claim(
        &self,
        identity: &Identity,
        raw_address: &str,
    ) -> Result<DripReceipt, ClaimError> {
        let recipient = Recipient::parse(raw_address)?;

        if self.is_allowlisted(identity) {
            if self.ledger.has_claimed(identity).await? {
                return Err(ClaimError::AlreadyClaimed);
            }
            let receipt = self.executor.drip(&recipient).await?;
            info!(
                identity = identity.id(),
                hash = %receipt.hash,
                "Allow-listed identity claimed without recording"
            );
            return Ok(receipt);
        }

        if !self.ledger.try_claim(identity).await? {
            return Err(ClaimError::AlreadyClaimed);
        }

        let receipt = match self.executor.drip(&recipient).await {
            Ok(receipt) => receipt,
            Err(err) => {
                match self.ledger.release(identity).await {
                    Ok(_) => warn!(identity = identity.id(), "Released claim after failed drip"),
                    Err(release_err) => error!(
                        identity = identity.id(),
                        "Failed to release claim after failed drip: {release_err}"
                    ),
                }
                return Err(err.into());
            }
        };

        // The window restarts at submission time.
        if let Err(err) = self.ledger.mark_claimed(identity).await {
            error!(identity = identity.id(), "Failed to refresh claim window: {err}");
        }
        info!(
            identity = identity.id(),
            handle = identity.handle(),
            hash = %receipt.hash,
            "Claim granted"
        );
        Ok(receipt)
    }
}
