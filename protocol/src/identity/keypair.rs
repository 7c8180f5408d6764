//! # Signing Keys
//!
//! Ed25519 keypairs for vault participants. The keypair is the signing
//! credential: it authenticates calls sent to a node, and its public key
//! hashes down to the participant's [`Address`].
//!
//! Private keys are never logged. `Debug` prints the address and nothing
//! else.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::Address;
use crate::config::{SIGNATURE_LENGTH, SIGNING_KEY_LENGTH};

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why*; error messages are not a place for
/// key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key: expected {SIGNING_KEY_LENGTH} hex-encoded bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,
}

/// An Ed25519 keypair.
///
/// Not `Serialize`. Exporting a secret should be a deliberate call to
/// [`secret_key_hex`](Self::secret_key_hex), not a side effect of putting a
/// keypair in a JSON response.
pub struct VaultKeypair {
    signing_key: SigningKey,
}

/// The public half of a keypair.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultPublicKey {
    #[serde(with = "hex_32")]
    bytes: [u8; 32],
}

/// A 64-byte Ed25519 signature, hex-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSignature {
    #[serde(with = "hex_vec")]
    bytes: Vec<u8>,
}

impl VaultKeypair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. In Ed25519 the seed is
    /// the secret key.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// The `index`-th well-known development account.
    ///
    /// Seeds are public (`BLAKE3("heirloom-dev-account-{index}")`), so these
    /// keys must never hold anything of value.
    pub fn dev_account(index: u32) -> Self {
        let seed = blake3::hash(format!("heirloom-dev-account-{index}").as_bytes());
        Self::from_seed(seed.as_bytes())
    }

    /// Parses a hex-encoded secret, with or without a `0x` prefix.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let trimmed = hex_str.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(body).map_err(|_| KeyError::InvalidSecretKey)?;
        let arr: [u8; SIGNING_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&arr))
    }

    pub fn public_key(&self) -> VaultPublicKey {
        VaultPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// The address this keypair controls.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    pub fn sign(&self, message: &[u8]) -> VaultSignature {
        VaultSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    pub fn verify(&self, message: &[u8], signature: &VaultSignature) -> bool {
        self.public_key().verify(message, signature)
    }

    /// Exports the secret key as hex. Handle with care.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl Clone for VaultKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for VaultKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKeypair(address={})", self.address())
    }
}

// ---------------------------------------------------------------------------
// VaultPublicKey
// ---------------------------------------------------------------------------

impl VaultPublicKey {
    /// Validates that the bytes are a usable Ed25519 point.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_bytes(arr)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn address(&self) -> Address {
        Address::from_public_key_bytes(&self.bytes)
    }

    /// Returns `true` only for a valid signature by this key over `message`.
    pub fn verify(&self, message: &[u8], signature: &VaultSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; SIGNATURE_LENGTH]>::try_from(signature.bytes.as_slice()) else {
            return false;
        };
        verifying_key
            .verify(message, &DalekSignature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl fmt::Display for VaultPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for VaultPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// VaultSignature
// ---------------------------------------------------------------------------

impl VaultSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidSignature)?;
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Debug for VaultSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 128 {
            write!(f, "VaultSignature({}...{})", &hex_str[..8], &hex_str[120..])
        } else {
            write!(f, "VaultSignature({})", hex_str)
        }
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
