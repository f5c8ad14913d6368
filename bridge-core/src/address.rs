//! Account addresses and destination checks
//!
//! This module provides:
//! - 20-byte account addresses with EIP-55 checksummed text form
//! - Keccak-256 hashing used for checksums and derived identities
//! - Bech32 validation of destination-chain addresses

use crate::error::ValidationError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// 20-byte account address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address, never a valid member or receiver
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Address whose low 8 bytes hold `value` (big-endian), e.g. `0x…0123`
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Deterministic address derived from a label (last 20 bytes of its Keccak-256)
    pub fn derive(label: &str) -> Self {
        let hash = keccak256(label.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Check for the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// EIP-55 mixed-case checksum encoding
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    /// Parse `0x`-prefixed hex. All-lowercase and all-uppercase input is
    /// accepted as is; mixed case must carry a valid EIP-55 checksum.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| ValidationError::MalformedAddress(s.to_string()))?;

        if digits.len() != 40 {
            return Err(ValidationError::MalformedAddress(s.to_string()));
        }

        let raw = hex::decode(digits).map_err(|_| ValidationError::MalformedAddress(s.to_string()))?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&raw);
        let address = Address(bytes);

        let mixed_case = digits.chars().any(|c| c.is_ascii_lowercase())
            && digits.chars().any(|c| c.is_ascii_uppercase());
        if mixed_case && &address.to_checksum()[2..] != digits {
            return Err(ValidationError::MalformedAddress(s.to_string()));
        }

        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_checksum())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(de::Error::custom)
        } else {
            let bytes = <[u8; 20]>::deserialize(deserializer)?;
            Ok(Address(bytes))
        }
    }
}

/// Keccak-256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Validate a destination-chain address: bech32 checksum and expected prefix
pub fn validate_destination(destination: &str, expected_hrp: &str) -> Result<(), ValidationError> {
    let (hrp, data, variant) = bech32::decode(destination)
        .map_err(|_| ValidationError::InvalidDestination(destination.to_string()))?;

    if hrp != expected_hrp || variant != bech32::Variant::Bech32 || data.is_empty() {
        return Err(ValidationError::InvalidDestination(destination.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bech32::ToBase32;

    #[test]
    fn test_checksum_known_vector() {
        let text = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let address: Address = text.parse().unwrap();
        assert_eq!(address.to_checksum(), text);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        // Same address with one letter's case flipped
        let text = "0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert!(text.parse::<Address>().is_err());

        // Lowercase form carries no checksum and is accepted
        let lower = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
        assert!(lower.parse::<Address>().is_ok());
    }

    #[test]
    fn test_malformed_addresses() {
        assert!("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse::<Address>().is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzzaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse::<Address>().is_err());
    }

    #[test]
    fn test_from_low_u64() {
        let address = Address::from_low_u64(0x123);
        assert_eq!(
            address.to_checksum().to_lowercase(),
            "0x0000000000000000000000000000000000000123"
        );
        assert!(!address.is_zero());
        assert!(Address::ZERO.is_zero());
    }

    #[test]
    fn test_derived_addresses_are_distinct() {
        assert_ne!(Address::derive("operator"), Address::derive("guardian"));
        assert_eq!(Address::derive("judge"), Address::derive("judge"));
    }

    #[test]
    fn test_serde_human_readable_roundtrip() {
        let address = Address::from_low_u64(0xbeef);
        let json = serde_json::to_string(&address).unwrap();
        assert!(json.starts_with("\"0x"));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_validate_destination() {
        let encoded =
            bech32::encode("link", [7u8; 20].to_base32(), bech32::Variant::Bech32).unwrap();
        assert!(validate_destination(&encoded, "link").is_ok());
        assert!(validate_destination(&encoded, "cosmos").is_err());

        // Corrupt the last checksum character
        let mut corrupted = encoded.clone();
        let last = corrupted.pop().unwrap();
        corrupted.push(if last == 'q' { 'p' } else { 'q' });
        assert!(validate_destination(&corrupted, "link").is_err());

        assert!(validate_destination("not-an-address", "link").is_err());
    }
}
