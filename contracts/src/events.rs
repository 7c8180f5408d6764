//! # Vault Events
//!
//! Every successful state change announces itself with one or more
//! events. The host appends them to the persistent log and fans them out
//! to WebSocket subscribers; nothing inside the vault reads them back.

use heirloom_protocol::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An event emitted by the inheritance vault.
///
/// Externally tagged on the wire: `{"HeirChanged": {"previous_heir": ..,
/// "new_heir": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    /// Value was added to the vault.
    FundsDeposited { sender: Address, amount: Amount },

    /// The owner took value out.
    FundsWithdrawn { recipient: Address, amount: Amount },

    /// The designated heir changed, either by the owner or as part of a
    /// claim.
    HeirChanged {
        previous_heir: Address,
        new_heir: Address,
    },

    /// The heir claimed the vault.
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
}

impl VaultEvent {
    /// The event's name, as used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            VaultEvent::FundsDeposited { .. } => "FundsDeposited",
            VaultEvent::FundsWithdrawn { .. } => "FundsWithdrawn",
            VaultEvent::HeirChanged { .. } => "HeirChanged",
            VaultEvent::OwnershipTransferred { .. } => "OwnershipTransferred",
        }
    }
}

impl fmt::Display for VaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultEvent::FundsDeposited { sender, amount } => {
                write!(f, "FundsDeposited({}, {})", sender, amount)
            }
            VaultEvent::FundsWithdrawn { recipient, amount } => {
                write!(f, "FundsWithdrawn({}, {})", recipient, amount)
            }
            VaultEvent::HeirChanged {
                previous_heir,
                new_heir,
            } => write!(f, "HeirChanged({}, {})", previous_heir, new_heir),
            VaultEvent::OwnershipTransferred {
                previous_owner,
                new_owner,
            } => write!(f, "OwnershipTransferred({}, {})", previous_owner, new_owner),
        }
    }
}
