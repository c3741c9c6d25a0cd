//! Builds, signs and relays the fixed-value drip transfer.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::address::{EthAddress, Recipient, namehash};
use crate::alerts::AlertSink;
use crate::nonce::NonceSequencer;
use crate::rpc::{ChainRpc, RpcError};

pub mod transaction;

use transaction::{LegacyTransaction, OperatorSigner, TRANSFER_GAS_LIMIT};

/// Bid above the observed price so drips are not stuck behind other traffic.
pub const GAS_PRICE_MULTIPLIER: u128 = 2;

// resolver(bytes32) and addr(bytes32)
const ENS_RESOLVER_SELECTOR: [u8; 4] = [0x01, 0x78, 0xb8, 0xbf];
const ENS_ADDR_SELECTOR: [u8; 4] = [0x3b, 0x3b, 0x57, 0xde];

#[derive(Debug, thiserror::Error)]
pub enum DripError {
    #[error("name {0} does not resolve to an address")]
    UnresolvedName(String),

    /// Failed before anything was reserved; nothing to compensate.
    #[error("drip dependency unavailable: {0}")]
    Unavailable(String),

    /// Failed after the nonce was reserved. The provider's reason is only
    /// reported through alerts.
    #[error("Error when processing drip for network {network}")]
    Submission { network: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DripReceipt {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub nonce: u64,
    #[serde(serialize_with = "as_decimal")]
    pub gas_price: u128,
    pub gas_limit: u64,
    #[serde(serialize_with = "as_decimal")]
    pub value: u128,
    pub chain_id: u64,
}

fn as_decimal<S: serde::Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub struct DripExecutor {
    rpc: Arc<dyn ChainRpc>,
    nonces: NonceSequencer,
    signer: OperatorSigner,
    alerts: AlertSink,
    network_id: u64,
    amount: u128,
    ens_registry: Option<EthAddress>,
}

impl DripExecutor {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        nonces: NonceSequencer,
        signer: OperatorSigner,
        alerts: AlertSink,
        network_id: u64,
        amount: u128,
        ens_registry: Option<EthAddress>,
    ) -> Self {
        assert!(network_id > 0, "Network id must be positive");
        assert!(amount > 0, "Drip amount must be positive");
        Self {
            rpc,
            nonces,
            signer,
            alerts,
            network_id,
            amount,
            ens_registry,
        }
    }

    pub fn operator(&self) -> EthAddress {
        self.signer.address()
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    pub fn amount(&self) -> u128 {
        self.amount
    }

    pub async fn drip(&self, recipient: &Recipient) -> Result<DripReceipt, DripError> {
        let to = self.resolve(recipient).await?;
        let network = self.network_id;

        let nonce = self
            .nonces
            .get_nonce(network)
            .await
            .map_err(|err| DripError::Unavailable(err.to_string()))?;
        let observed = self
            .rpc
            .gas_price()
            .await
            .map_err(|err| DripError::Unavailable(err.to_string()))?;
        let gas_price = observed.saturating_mul(GAS_PRICE_MULTIPLIER);

        // Reserved before submission so a concurrent drip does not reuse it.
        self.nonces
            .reserve_next(network, nonce)
            .await
            .map_err(|err| DripError::Unavailable(err.to_string()))?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: TRANSFER_GAS_LIMIT,
            to,
            value: self.amount,
            chain_id: network,
        };

        let submitted = match self.signer.sign(&tx) {
            Ok(signed) => self
                .rpc
                .send_raw_transaction(&signed.raw)
                .await
                .map(|node_hash| (node_hash, signed))
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match submitted {
            Ok((node_hash, signed)) => {
                if !node_hash.eq_ignore_ascii_case(&signed.hash_hex()) {
                    warn!(
                        "Node reported hash {node_hash}, locally computed {}",
                        signed.hash_hex()
                    );
                }
                info!("Drip sent on network {network} to {to} with nonce {nonce}: {node_hash}");
                Ok(DripReceipt {
                    hash: node_hash,
                    from: self.signer.address().to_checksum(),
                    to: to.to_checksum(),
                    nonce,
                    gas_price,
                    gas_limit: TRANSFER_GAS_LIMIT,
                    value: self.amount,
                    chain_id: network,
                })
            }
            Err(reason) => Err(self.self_heal(network, &reason).await),
        }
    }

    /// Clears the cached nonce and raises exactly one alert.
    async fn self_heal(&self, network: u64, reason: &str) -> DripError {
        error!("Drip submission failed on network {network}: {reason}");
        let outcome = match self.nonces.invalidate(network).await {
            Ok(true) => "cached nonce cleared".to_string(),
            Ok(false) => "no cached nonce to clear".to_string(),
            Err(err) => format!("nonce invalidation failed: {err}"),
        };
        self.alerts.notify(format!(
            "Error dripping for network {network}: {reason}. Self-heal: {outcome}"
        ));
        DripError::Submission { network }
    }

    async fn resolve(&self, recipient: &Recipient) -> Result<EthAddress, DripError> {
        match recipient {
            Recipient::Address(address) => Ok(*address),
            Recipient::Name(name) => self.resolve_name(name).await,
        }
    }

    async fn resolve_name(&self, name: &str) -> Result<EthAddress, DripError> {
        let registry = self
            .ens_registry
            .ok_or_else(|| DripError::UnresolvedName(name.to_string()))?;
        let node = namehash(name);

        let resolver = self
            .lookup(&registry, ENS_RESOLVER_SELECTOR, &node)
            .await?
            .ok_or_else(|| DripError::UnresolvedName(name.to_string()))?;
        self.lookup(&resolver, ENS_ADDR_SELECTOR, &node)
            .await?
            .ok_or_else(|| DripError::UnresolvedName(name.to_string()))
    }

    /// Calls `selector(node)` on `contract` and decodes an address word.
    async fn lookup(
        &self,
        contract: &EthAddress,
        selector: [u8; 4],
        node: &[u8; 32],
    ) -> Result<Option<EthAddress>, DripError> {
        let mut calldata = Vec::with_capacity(36);
        calldata.extend_from_slice(&selector);
        calldata.extend_from_slice(node);
        let output = match self.rpc.call(contract, &calldata).await {
            Ok(output) => output,
            Err(RpcError::Rejected(_)) => return Ok(None),
            Err(err) => return Err(DripError::Unavailable(err.to_string())),
        };
        Ok(decode_address_word(&output))
    }
}

fn decode_address_word(output: &[u8]) -> Option<EthAddress> {
    if output.len() < 32 {
        return None;
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&output[12..32]);
    let address = EthAddress::from_bytes(bytes);
    (!address.is_zero()).then_some(address)
}
