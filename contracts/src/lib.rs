//! # Heirloom Contracts
//!
//! The inheritance vault and everything needed to talk to it:
//!
//! - **Inheritance**: the vault state machine. An owner holds funds; a
//!   single heir may take over once the owner has been inactive for thirty
//!   days.
//! - **Events**: what a successful call announces to the outside world.
//! - **Call**: the caller/time context every call runs under, the call
//!   enum a host dispatches, and the Ed25519-signed envelope remote
//!   callers submit.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow. `checked_add` and
//!    `checked_sub` everywhere.
//! 2. Role check, then argument check, then eligibility. A call that fails
//!    any check leaves the vault exactly as it found it.
//! 3. Time and identity are inputs. The vault never asks the system who is
//!    calling or what time it is.
//! 4. Every public type is serializable (serde) for wire transport and
//!    persistent storage.

pub mod call;
pub mod events;
pub mod inheritance;

pub use call::{CallContext, CallError, SignedCall, VaultCall};
pub use events::VaultEvent;
pub use inheritance::{
    InheritanceVault, InvalidHeirReason, InvariantViolation, UnauthorizedAction, VaultError,
};
