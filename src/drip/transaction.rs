//! EIP-155 legacy value transfers signed by the operator key.

use std::fmt;

use k256::ecdsa::{SigningKey, VerifyingKey};
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::address::{ADDRESS_BYTES, EthAddress};

/// Gas limit of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("operator key is not 32 bytes of hex")]
    MalformedKey,

    #[error("operator key is not a valid secp256k1 scalar")]
    InvalidKey,

    #[error("signing failed: {0}")]
    Signature(String),

    #[error("chain id {0} overflows the recovery value")]
    ChainIdOverflow(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: EthAddress,
    pub value: u128,
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

impl LegacyTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to.as_bytes().to_vec());
        stream.append(&self.value);
        stream.append(&Vec::<u8>::new());
    }

    /// Keccak of `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keccak(stream.out()).0
    }
}

/// Holds the faucet's hot key. Never logged.
pub struct OperatorSigner {
    key: SigningKey,
    address: EthAddress,
}

impl fmt::Debug for OperatorSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl OperatorSigner {
    pub fn from_hex(secret: &str) -> Result<Self, SigningError> {
        let trimmed = secret.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| SigningError::MalformedKey)?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| SigningError::InvalidKey)?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    pub fn address(&self) -> EthAddress {
        self.address
    }

    pub fn sign(&self, tx: &LegacyTransaction) -> Result<SignedTransaction, SigningError> {
        let digest = tx.signing_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|err| SigningError::Signature(err.to_string()))?;

        let v = tx
            .chain_id
            .checked_mul(2)
            .and_then(|doubled| doubled.checked_add(35 + u64::from(recovery_id.to_byte())))
            .ok_or(SigningError::ChainIdOverflow(tx.chain_id))?;
        let signature_bytes = signature.to_bytes();
        let (r, s) = signature_bytes.split_at(32);

        let mut stream = RlpStream::new_list(9);
        tx.append_body(&mut stream);
        stream.append(&v);
        stream.append(&strip_leading_zeros(r));
        stream.append(&strip_leading_zeros(s));
        let raw = stream.out().to_vec();
        let hash = keccak(&raw).0;
        Ok(SignedTransaction { raw, hash })
    }
}

fn address_of(key: &VerifyingKey) -> EthAddress {
    let point = key.to_encoded_point(false);
    let digest = keccak(&point.as_bytes()[1..]);
    let mut bytes = [0u8; ADDRESS_BYTES];
    bytes.copy_from_slice(&digest.0[32 - ADDRESS_BYTES..]);
    EthAddress::from_bytes(bytes)
}

/// RLP integers are minimal big-endian byte strings.
fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}
