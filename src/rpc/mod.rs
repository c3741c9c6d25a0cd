use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Serialize;

use crate::address::EthAddress;

/// Failure talking to the chain endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The node answered with a JSON-RPC error object.
    #[error("{0}")]
    Rejected(String),

    #[error("rpc transport failure: {0}")]
    Transport(String),

    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl From<ClientError> for RpcError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Call(object) => Self::Rejected(object.message().to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// The slice of the Ethereum JSON-RPC surface the faucet relies on.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Pending transaction count of `account`, the authoritative next nonce.
    async fn transaction_count(&self, account: &EthAddress) -> Result<u64, RpcError>;

    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// Relays a signed transaction and returns its hash as reported by the node.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError>;

    /// Read-only contract call against the latest block.
    async fn call(&self, to: &EthAddress, data: &[u8]) -> Result<Vec<u8>, RpcError>;
}

#[derive(Clone)]
pub struct RpcClient {
    inner: HttpClient,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build RPC client for {endpoint}"))?;

        Ok(Self {
            inner: client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        assert!(
            self.timeout <= Duration::from_secs(60),
            "Timeout exceeds maximum bound"
        );
        self.timeout
    }
}

#[derive(Serialize)]
struct CallRequest {
    to: String,
    data: String,
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn transaction_count(&self, account: &EthAddress) -> Result<u64, RpcError> {
        let quantity: String = self
            .inner
            .request(
                "eth_getTransactionCount",
                rpc_params![account.to_checksum(), "pending"],
            )
            .await?;
        let count = parse_quantity(&quantity)?;
        u64::try_from(count).map_err(|_| RpcError::Malformed(format!("nonce {count} exceeds u64")))
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        let quantity: String = self.inner.request("eth_gasPrice", rpc_params![]).await?;
        parse_quantity(&quantity)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        let hash: String = self
            .inner
            .request(
                "eth_sendRawTransaction",
                rpc_params![format!("0x{}", hex::encode(raw))],
            )
            .await?;
        if hash.is_empty() {
            return Err(RpcError::Malformed(
                "node returned empty transaction hash".to_string(),
            ));
        }
        Ok(hash)
    }

    async fn call(&self, to: &EthAddress, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let request = CallRequest {
            to: to.to_checksum(),
            data: format!("0x{}", hex::encode(data)),
        };
        let output: String = self
            .inner
            .request("eth_call", rpc_params![request, "latest"])
            .await?;
        decode_data(&output)
    }
}

/// Decodes a JSON-RPC hex quantity such as `0x1a`.
pub fn parse_quantity(value: &str) -> Result<u128, RpcError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::Malformed(format!("quantity {value} lacks 0x prefix")))?;
    if digits.is_empty() {
        return Err(RpcError::Malformed("empty quantity".to_string()));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|err| RpcError::Malformed(format!("quantity {value}: {err}")))
}

fn decode_data(value: &str) -> Result<Vec<u8>, RpcError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(|err| RpcError::Malformed(format!("call output: {err}")))
}
