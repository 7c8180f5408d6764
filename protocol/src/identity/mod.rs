//! # Identity Module
//!
//! Who is calling, and can they prove it. Every vault participant is an
//! account identified by a 20-byte [`Address`]. Accounts backed by a local
//! Ed25519 [`VaultKeypair`] can sign calls; the address is the last 20 bytes
//! of the BLAKE3 hash of the public key.
//!
//! ## Design Decisions
//!
//! - Ed25519 via `ed25519-dalek` for signing. Small keys, fast verification,
//!   no nonce-reuse footguns.
//! - Addresses are plain hex, not a checksummed encoding. They have to line
//!   up with the `0x...` strings operators already keep in env files.

pub mod address;
pub mod keypair;

pub use address::{Address, AddressError};
pub use keypair::{KeyError, VaultKeypair, VaultPublicKey, VaultSignature};
