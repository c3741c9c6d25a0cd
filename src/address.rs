//! Recipient parsing: EIP-55 checksummed hex addresses and `.eth` names.

use std::fmt;

use keccak_hash::keccak;

pub const ADDRESS_BYTES: usize = 20;
pub const ENS_SUFFIX: &str = ".eth";
pub const MAX_NAME_LEN: usize = 255;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthAddress([u8; ADDRESS_BYTES]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address must be 40 hex characters")]
    Malformed,

    #[error("address checksum mismatch")]
    BadChecksum,

    #[error("name {0} is not a valid .eth name")]
    BadName(String),
}

impl EthAddress {
    pub const fn from_bytes(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_BYTES]
    }

    /// Parses a hex address. Single-case input is taken as-is; mixed case
    /// must carry a valid EIP-55 checksum.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != ADDRESS_BYTES * 2 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::Malformed);
        }

        let mut bytes = [0u8; ADDRESS_BYTES];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| AddressError::Malformed)?;
        let address = Self(bytes);

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *digits {
            return Err(AddressError::BadChecksum);
        }
        Ok(address)
    }

    /// EIP-55 mixed-case encoding with `0x` prefix.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak(lower.as_bytes());
        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");
        for (index, ch) in lower.chars().enumerate() {
            let byte = hash.0[index / 2];
            let nibble = if index % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthAddress({})", self.to_checksum())
    }
}

/// A validated claim destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Address(EthAddress),
    /// Lower-cased `.eth` name, resolved at drip time.
    Name(String),
}

impl Recipient {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.ends_with(ENS_SUFFIX) {
            return parse_name(&lowered).map(Self::Name);
        }
        EthAddress::parse(trimmed).map(Self::Address)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => address.fmt(f),
            Self::Name(name) => f.write_str(name),
        }
    }
}

fn parse_name(name: &str) -> Result<String, AddressError> {
    let bad = || AddressError::BadName(name.to_string());
    if name.len() > MAX_NAME_LEN || name.len() <= ENS_SUFFIX.len() {
        return Err(bad());
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
        return Err(bad());
    }
    if name.split('.').any(str::is_empty) {
        return Err(bad());
    }
    Ok(name.to_string())
}

/// ENS namehash of an already-normalized name.
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak(label.as_bytes());
        let mut buffer = [0u8; 64];
        buffer[..32].copy_from_slice(&node);
        buffer[32..].copy_from_slice(&label_hash.0);
        node = keccak(buffer).0;
    }
    node
}
