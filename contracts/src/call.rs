//! # Calls
//!
//! How the outside world reaches the vault.
//!
//! A [`CallContext`] says who is calling and when; the host fills it in,
//! the vault trusts it. A [`VaultCall`] names one mutating operation and
//! its argument, so a host can accept calls over the wire and dispatch
//! them uniformly. A [`SignedCall`] wraps a `VaultCall` with a nonce and an
//! Ed25519 signature so a remote caller can prove which address they are.

use chrono::{DateTime, Utc};
use heirloom_protocol::{
    Address, Amount, TransferSink, VaultKeypair, VaultPublicKey, VaultSignature,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::VaultEvent;
use crate::inheritance::{InheritanceVault, VaultError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building or checking a signed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("failed to encode call: {0}")]
    Encoding(String),

    #[error("signature does not match public key {public_key}")]
    BadSignature { public_key: String },
}

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// Caller identity and time for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub now: DateTime<Utc>,
}

impl CallContext {
    pub fn new(caller: Address, now: DateTime<Utc>) -> Self {
        Self { caller, now }
    }
}

// ---------------------------------------------------------------------------
// VaultCall
// ---------------------------------------------------------------------------

/// A mutating vault operation and its argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultCall {
    Deposit { amount: Amount },
    Withdraw { amount: Amount },
    SetHeir { new_heir: Address },
    ClaimOwnership { next_heir: Address },
}

impl VaultCall {
    /// Applies the call to `vault`.
    ///
    /// `sink` receives outgoing value and is only touched by `Withdraw`.
    /// Incoming value for `Deposit` must already have been collected by
    /// the caller of this method.
    pub fn dispatch(
        &self,
        vault: &mut InheritanceVault,
        ctx: &CallContext,
        sink: &mut dyn TransferSink,
    ) -> Result<Vec<VaultEvent>, VaultError> {
        match self {
            VaultCall::Deposit { amount } => vault.deposit(ctx, *amount),
            VaultCall::Withdraw { amount } => vault.withdraw(ctx, *amount, sink),
            VaultCall::SetHeir { new_heir } => vault.set_heir(ctx, *new_heir),
            VaultCall::ClaimOwnership { next_heir } => vault.claim_ownership(ctx, *next_heir),
        }
    }

    /// Operation name, as used in logs, metrics and RPC method names.
    pub fn name(&self) -> &'static str {
        match self {
            VaultCall::Deposit { .. } => "deposit",
            VaultCall::Withdraw { .. } => "withdraw",
            VaultCall::SetHeir { .. } => "setHeir",
            VaultCall::ClaimOwnership { .. } => "claimOwnership",
        }
    }

    /// Value the caller attaches to the call, if any.
    pub fn attached_value(&self) -> Option<Amount> {
        match self {
            VaultCall::Deposit { amount } => Some(*amount),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SignedCall
// ---------------------------------------------------------------------------

/// A [`VaultCall`] signed by the caller's Ed25519 key.
///
/// The signature covers `bincode((call, nonce))`. The nonce must equal the
/// host's next expected nonce for the signer's address, which makes every
/// signed call single-use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCall {
    pub call: VaultCall,
    pub nonce: u64,
    pub public_key: VaultPublicKey,
    pub signature: VaultSignature,
}

impl SignedCall {
    /// The exact bytes a signer signs.
    pub fn signable_bytes(call: &VaultCall, nonce: u64) -> Result<Vec<u8>, CallError> {
        bincode::serialize(&(call, nonce)).map_err(|e| CallError::Encoding(e.to_string()))
    }

    pub fn sign(call: VaultCall, nonce: u64, keypair: &VaultKeypair) -> Result<Self, CallError> {
        let bytes = Self::signable_bytes(&call, nonce)?;
        Ok(Self {
            signature: keypair.sign(&bytes),
            public_key: keypair.public_key(),
            call,
            nonce,
        })
    }

    /// Address derived from the embedded public key.
    pub fn caller(&self) -> Address {
        self.public_key.address()
    }

    /// Checks the signature and returns the authenticated caller.
    pub fn verify(&self) -> Result<Address, CallError> {
        let bytes = Self::signable_bytes(&self.call, self.nonce)?;
        if !self.public_key.verify(&bytes, &self.signature) {
            return Err(CallError::BadSignature {
                public_key: self.public_key.to_hex(),
            });
        }
        Ok(self.caller())
    }
}
