//! # Addresses
//!
//! An [`Address`] is 20 raw bytes, shown to humans as `0x` followed by 40
//! lowercase hex characters. Addresses are derived from Ed25519 public keys
//! (see [`super::keypair`]) but can also be parsed from strings for
//! identities we only know by name, such as an heir who hasn't generated
//! a key on this machine.
//!
//! The all-zero address is the null identity. It is never a valid heir.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::ADDRESS_LENGTH;

/// Errors produced while parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The string is not valid hex.
    #[error("invalid address '{0}': not hex")]
    InvalidHex(String),

    /// The decoded bytes have the wrong length.
    #[error("invalid address length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        got: usize,
    },
}

/// A 20-byte account identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The null identity.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Returns `true` for the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Derives an address from a 32-byte Ed25519 public key.
    ///
    /// `address = BLAKE3(public_key)[12..32]`, i.e. the last 20 bytes of
    /// the digest.
    pub fn from_public_key_bytes(public_key: &[u8; 32]) -> Self {
        let digest = blake3::hash(public_key);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest.as_bytes()[32 - ADDRESS_LENGTH..]);
        Self(bytes)
    }

    /// Lowercase `0x`-prefixed hex rendering.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses `0x`-prefixed or bare hex, in either case.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let bytes = hex::decode(body).map_err(|_| AddressError::InvalidHex(s.to_string()))?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_LENGTH,
                got: bytes.len(),
            });
        }

        let mut arr = [0u8; ADDRESS_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
