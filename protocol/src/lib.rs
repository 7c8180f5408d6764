// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Heirloom Protocol: Core Library
//!
//! The plumbing underneath the inheritance vault. The vault state machine
//! itself lives in `heirloom-contracts`; this crate provides the vocabulary
//! it speaks and the environment it runs in:
//!
//! - **config**: Protocol constants: inactivity delay, decimals, defaults.
//! - **identity**: 20-byte addresses and the Ed25519 keys that own them.
//! - **amount**: Integer base-unit amounts with decimal parsing/formatting.
//! - **clock**: The monotonic time source the host feeds into every call.
//! - **ledger**: External native-asset accounts that value moves in and out of.
//! - **storage**: sled-backed persistence for the vault, events and accounts.
//!
//! ## Design Philosophy
//!
//! 1. Money is integers. No floats anywhere near a balance.
//! 2. Time is an input, never a global. Tests drive a manual clock.
//! 3. If it touches money, it has tests. Plural.

pub mod amount;
pub mod clock;
pub mod config;
pub mod identity;
pub mod ledger;
pub mod storage;

pub use amount::{Amount, AmountError};
pub use clock::{Clock, ClockOverflow, ManualClock, SystemClock};
pub use identity::{Address, AddressError, KeyError, VaultKeypair, VaultPublicKey, VaultSignature};
pub use ledger::{LedgerError, NativeLedger, TransferSink};
