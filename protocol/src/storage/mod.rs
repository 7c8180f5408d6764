//! # Storage Module
//!
//! Persistence for a deployed vault. One sled database per deployment,
//! holding the vault record, its event log, the external account balances
//! and the signed-call nonces.
//!
//! ```text
//! db.rs   VaultDB: sled trees, bincode values, atomic commit
//! ```
//!
//! The storage layer is deliberately ignorant of what a vault *is*. It
//! stores anything `Serialize` under a well-known key, so the contracts
//! crate can own its types without the protocol crate depending on it.

pub mod db;

pub use db::{Commit, DbError, DbResult, VaultDB};
