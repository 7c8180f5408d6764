//! # Inheritance Vault
//!
//! A single vault with a single owner and a single heir. The lifecycle is:
//!
//! 1. **Deploy**: the deployer becomes the owner, names an heir and
//!    attaches the initial funding in the same step.
//! 2. **Use**: the owner withdraws and re-designates the heir at will.
//!    Each of those calls counts as proof of life and resets the
//!    inactivity timer. Anyone may deposit; deposits prove nothing.
//! 3. **Claim**: once thirty days pass without proof of life, the heir
//!    may take ownership, naming their own heir as they do.
//!
//! There is no terminal state. A claimed vault is just a vault with a new
//! owner, and the cycle starts again.
//!
//! Every operation checks, in order: caller role, then arguments, then
//! eligibility or balance. The first failing check decides the error and
//! nothing is mutated.

use chrono::{DateTime, Duration, Utc};
use heirloom_protocol::config::inactivity_delay;
use heirloom_protocol::{Address, Amount, LedgerError, TransferSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::call::CallContext;
use crate::events::VaultEvent;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The privileged action a caller attempted without holding the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedAction {
    Withdraw,
    SetHeir,
    ClaimOwnership,
}

impl fmt::Display for UnauthorizedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnauthorizedAction::Withdraw => write!(f, "Only the owner can withdraw funds."),
            UnauthorizedAction::SetHeir => write!(f, "Only the owner can set a new heir."),
            UnauthorizedAction::ClaimOwnership => {
                write!(f, "Only the designated heir can claim ownership.")
            }
        }
    }
}

/// Why a proposed heir was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidHeirReason {
    /// The null identity.
    ZeroAddress,
    /// The heir would be the same account as the (new) owner.
    SameAsOwner,
}

impl fmt::Display for InvalidHeirReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidHeirReason::ZeroAddress => write!(f, "Heir cannot be the zero address."),
            InvalidHeirReason::SameAsOwner => write!(f, "Owner cannot be the heir."),
        }
    }
}

/// Errors that can occur during vault operations.
///
/// The `Display` text of the first four variants is the exact reason a
/// caller sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The caller does not hold the role the operation requires.
    #[error("{0}")]
    Unauthorized(UnauthorizedAction),

    /// The proposed heir is null or equal to the owner.
    #[error("{0}")]
    InvalidHeir(InvalidHeirReason),

    /// Tried to withdraw more than the vault holds.
    #[error("Insufficient contract balance.")]
    InsufficientBalance {
        /// Amount the caller asked for.
        requested: Amount,
        /// Amount the vault holds.
        available: Amount,
    },

    /// The heir tried to claim before the inactivity delay elapsed.
    #[error("The owner still has control.")]
    OwnerStillActive {
        /// First instant at which a claim will succeed.
        claimable_at: DateTime<Utc>,
    },

    /// The outgoing transfer was refused. The call was rolled back.
    #[error("Transfer failed: {0}")]
    TransferFailed(LedgerError),

    /// An arithmetic overflow would occur.
    #[error("Amount overflow: operation would exceed allowed limits.")]
    AmountOverflow,
}

impl VaultError {
    /// Stable name of the error class, for API payloads and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::Unauthorized(_) => "Unauthorized",
            VaultError::InvalidHeir(_) => "InvalidHeir",
            VaultError::InsufficientBalance { .. } => "InsufficientBalance",
            VaultError::OwnerStillActive { .. } => "OwnerStillActive",
            VaultError::TransferFailed(_) => "TransferFailed",
            VaultError::AmountOverflow => "AmountOverflow",
        }
    }
}

/// A broken structural invariant, found by [`InheritanceVault::check_invariants`].
///
/// None of these are reachable through the public operations. Seeing one
/// means the stored record was tampered with or corrupted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("owner and heir are the same account ({0})")]
    OwnerIsHeir(Address),

    #[error("heir is the zero address")]
    NullHeir,

    #[error("balance {balance} does not equal deposits {deposited} minus withdrawals {withdrawn}")]
    BalanceMismatch {
        balance: Amount,
        deposited: Amount,
        withdrawn: Amount,
    },

    #[error("last activity {last_activity} predates creation {created_at}")]
    ActivityBeforeCreation {
        last_activity: DateTime<Utc>,
        created_at: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The inheritance vault.
///
/// Fields are private: the only way to change them is through the
/// operations below, which keep every invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceVault {
    vault_id: String,
    owner: Address,
    heir: Address,
    balance: Amount,
    last_activity: DateTime<Utc>,
    created_at: DateTime<Utc>,
    total_deposited: Amount,
    total_withdrawn: Amount,
}

impl InheritanceVault {
    /// Deploys a new vault owned by `ctx.caller`.
    ///
    /// `funding` is the value attached to the deployment; it becomes the
    /// opening balance and counts as the first deposit.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidHeir`] if `heir` is null or the deployer.
    pub fn new(ctx: &CallContext, heir: Address, funding: Amount) -> Result<Self, VaultError> {
        validate_heir(heir, ctx.caller)?;

        debug!(owner = %ctx.caller, heir = %heir, funding = %funding, "vault created");
        Ok(Self {
            vault_id: Uuid::new_v4().to_string(),
            owner: ctx.caller,
            heir,
            balance: funding,
            last_activity: ctx.now,
            created_at: ctx.now,
            total_deposited: funding,
            total_withdrawn: Amount::ZERO,
        })
    }

    // -- Accessors ----------------------------------------------------------

    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn heir(&self) -> Address {
        self.heir
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// Time of the owner's last withdraw or heir change (or deployment).
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn total_deposited(&self) -> Amount {
        self.total_deposited
    }

    pub fn total_withdrawn(&self) -> Amount {
        self.total_withdrawn
    }

    /// First instant at which the heir may claim.
    pub fn claimable_at(&self) -> DateTime<Utc> {
        self.last_activity + inactivity_delay()
    }

    /// `now - last_activity >= 30 days`. Inclusive.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_activity) >= inactivity_delay()
    }

    /// How long until the heir may claim. Zero once claimable.
    pub fn time_until_claimable(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.claimable_at().signed_duration_since(now);
        remaining.max(Duration::zero())
    }

    // -- Operations ---------------------------------------------------------

    /// Adds `amount` to the vault. Open to any caller.
    ///
    /// Does not count as owner activity, even when the owner deposits.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::AmountOverflow`] if the balance would overflow.
    pub fn deposit(
        &mut self,
        ctx: &CallContext,
        amount: Amount,
    ) -> Result<Vec<VaultEvent>, VaultError> {
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(VaultError::AmountOverflow)?;
        let total_deposited = self
            .total_deposited
            .checked_add(amount)
            .ok_or(VaultError::AmountOverflow)?;

        self.balance = balance;
        self.total_deposited = total_deposited;

        Ok(vec![VaultEvent::FundsDeposited {
            sender: ctx.caller,
            amount,
        }])
    }

    /// Owner takes `amount` out of the vault, paid through `sink`.
    ///
    /// Balance and activity are updated before the transfer is attempted.
    /// If the transfer fails the vault is restored to its prior state.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Unauthorized`] if the caller is not the owner.
    /// - [`VaultError::InsufficientBalance`] if `amount` exceeds the balance.
    /// - [`VaultError::TransferFailed`] if `sink` refuses the payment.
    pub fn withdraw(
        &mut self,
        ctx: &CallContext,
        amount: Amount,
        sink: &mut dyn TransferSink,
    ) -> Result<Vec<VaultEvent>, VaultError> {
        if ctx.caller != self.owner {
            return Err(VaultError::Unauthorized(UnauthorizedAction::Withdraw));
        }

        let balance = self
            .balance
            .checked_sub(amount)
            .ok_or(VaultError::InsufficientBalance {
                requested: amount,
                available: self.balance,
            })?;
        let total_withdrawn = self
            .total_withdrawn
            .checked_add(amount)
            .ok_or(VaultError::AmountOverflow)?;

        let snapshot = self.clone();

        // Effects
        self.balance = balance;
        self.total_withdrawn = total_withdrawn;
        self.touch(ctx.now);

        // Interaction
        if let Err(e) = sink.transfer(&self.owner, amount) {
            *self = snapshot;
            return Err(VaultError::TransferFailed(e));
        }

        debug!(owner = %self.owner, amount = %amount, "funds withdrawn");
        Ok(vec![VaultEvent::FundsWithdrawn {
            recipient: self.owner,
            amount,
        }])
    }

    /// Owner designates a new heir.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Unauthorized`] if the caller is not the owner.
    /// - [`VaultError::InvalidHeir`] if `new_heir` is null or the owner.
    pub fn set_heir(
        &mut self,
        ctx: &CallContext,
        new_heir: Address,
    ) -> Result<Vec<VaultEvent>, VaultError> {
        if ctx.caller != self.owner {
            return Err(VaultError::Unauthorized(UnauthorizedAction::SetHeir));
        }
        validate_heir(new_heir, self.owner)?;

        let previous_heir = self.heir;
        self.heir = new_heir;
        self.touch(ctx.now);

        debug!(previous = %previous_heir, new = %new_heir, "heir changed");
        Ok(vec![VaultEvent::HeirChanged {
            previous_heir,
            new_heir,
        }])
    }

    /// Heir takes ownership after the inactivity delay, naming `next_heir`
    /// as their own successor.
    ///
    /// Emits `OwnershipTransferred` followed by `HeirChanged`.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Unauthorized`] if the caller is not the heir.
    /// - [`VaultError::InvalidHeir`] if `next_heir` is null or the caller.
    /// - [`VaultError::OwnerStillActive`] if the delay has not elapsed.
    pub fn claim_ownership(
        &mut self,
        ctx: &CallContext,
        next_heir: Address,
    ) -> Result<Vec<VaultEvent>, VaultError> {
        if ctx.caller != self.heir {
            return Err(VaultError::Unauthorized(UnauthorizedAction::ClaimOwnership));
        }
        validate_heir(next_heir, ctx.caller)?;
        if !self.is_claimable(ctx.now) {
            return Err(VaultError::OwnerStillActive {
                claimable_at: self.claimable_at(),
            });
        }

        let previous_owner = self.owner;
        let claimer = self.heir;
        self.owner = claimer;
        self.heir = next_heir;
        self.touch(ctx.now);

        debug!(previous = %previous_owner, new = %claimer, "ownership claimed");
        Ok(vec![
            VaultEvent::OwnershipTransferred {
                previous_owner,
                new_owner: claimer,
            },
            VaultEvent::HeirChanged {
                previous_heir: claimer,
                new_heir: next_heir,
            },
        ])
    }

    /// Verifies the structural invariants of a loaded record.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.heir.is_zero() {
            return Err(InvariantViolation::NullHeir);
        }
        if self.owner == self.heir {
            return Err(InvariantViolation::OwnerIsHeir(self.owner));
        }
        if self.total_deposited.checked_sub(self.total_withdrawn) != Some(self.balance) {
            return Err(InvariantViolation::BalanceMismatch {
                balance: self.balance,
                deposited: self.total_deposited,
                withdrawn: self.total_withdrawn,
            });
        }
        if self.last_activity < self.created_at {
            return Err(InvariantViolation::ActivityBeforeCreation {
                last_activity: self.last_activity,
                created_at: self.created_at,
            });
        }
        Ok(())
    }

    /// Records owner activity. Never moves the timestamp backwards.
    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

fn validate_heir(heir: Address, owner: Address) -> Result<(), VaultError> {
    if heir.is_zero() {
        return Err(VaultError::InvalidHeir(InvalidHeirReason::ZeroAddress));
    }
    if heir == owner {
        return Err(VaultError::InvalidHeir(InvalidHeirReason::SameAsOwner));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use heirloom_protocol::NativeLedger;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn coins(n: u128) -> Amount {
        Amount::from_coins(n).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn ctx(caller: u8, now: DateTime<Utc>) -> CallContext {
        CallContext::new(addr(caller), now)
    }

    fn sample_vault() -> InheritanceVault {
        InheritanceVault::new(&ctx(1, t0()), addr(2), coins(1)).unwrap()
    }

    #[test]
    fn new_vault_has_deployer_as_owner() {
        let vault = sample_vault();
        assert_eq!(vault.owner(), addr(1));
        assert_eq!(vault.heir(), addr(2));
        assert_eq!(vault.balance(), coins(1));
        assert_eq!(vault.last_activity(), t0());
        assert!(vault.check_invariants().is_ok());
    }

    #[test]
    fn new_rejects_zero_heir() {
        let err = InheritanceVault::new(&ctx(1, t0()), Address::ZERO, coins(1)).unwrap_err();
        assert_eq!(err.to_string(), "Heir cannot be the zero address.");
    }

    #[test]
    fn new_rejects_deployer_as_heir() {
        let err = InheritanceVault::new(&ctx(1, t0()), addr(1), coins(1)).unwrap_err();
        assert_eq!(err, VaultError::InvalidHeir(InvalidHeirReason::SameAsOwner));
        assert_eq!(err.to_string(), "Owner cannot be the heir.");
    }

    #[test]
    fn deposit_does_not_touch_activity() {
        let mut vault = sample_vault();
        let later = t0() + Duration::days(10);
        let events = vault.deposit(&ctx(1, later), coins(2)).unwrap();
        assert_eq!(vault.balance(), coins(3));
        assert_eq!(vault.last_activity(), t0());
        assert_eq!(
            events,
            vec![VaultEvent::FundsDeposited {
                sender: addr(1),
                amount: coins(2)
            }]
        );
    }

    #[test]
    fn deposit_overflow_rejected() {
        let mut vault = sample_vault();
        let err = vault
            .deposit(&ctx(3, t0()), Amount::from_base_units(u128::MAX))
            .unwrap_err();
        assert_eq!(err, VaultError::AmountOverflow);
        assert_eq!(vault.balance(), coins(1));
    }

    #[test]
    fn withdraw_pays_owner_and_touches_activity() {
        let mut vault = sample_vault();
        let mut ledger = NativeLedger::new();
        let later = t0() + Duration::hours(1);

        let events = vault
            .withdraw(&ctx(1, later), coins(1), &mut ledger)
            .unwrap();
        assert_eq!(vault.balance(), Amount::ZERO);
        assert_eq!(vault.last_activity(), later);
        assert_eq!(ledger.balance_of(&addr(1)), coins(1));
        assert_eq!(events[0].name(), "FundsWithdrawn");
        assert!(vault.check_invariants().is_ok());
    }

    #[test]
    fn withdraw_by_stranger_is_unauthorized() {
        let mut vault = sample_vault();
        let mut ledger = NativeLedger::new();
        let err = vault
            .withdraw(&ctx(4, t0()), coins(2), &mut ledger)
            .unwrap_err();
        assert_eq!(err.to_string(), "Only the owner can withdraw funds.");
        assert_eq!(err.kind(), "Unauthorized");
    }

    #[test]
    fn withdraw_more_than_balance_rejected() {
        let mut vault = sample_vault();
        let before = vault.clone();
        let mut ledger = NativeLedger::new();
        let err = vault
            .withdraw(&ctx(1, t0()), coins(2), &mut ledger)
            .unwrap_err();
        assert_eq!(err.to_string(), "Insufficient contract balance.");
        assert_eq!(vault, before);
    }

    #[test]
    fn failed_transfer_rolls_back() {
        let mut vault = sample_vault();
        let before = vault.clone();
        let mut ledger = NativeLedger::new();
        ledger.set_rejecting(addr(1), true);

        let err = vault
            .withdraw(&ctx(1, t0() + Duration::days(1)), coins(1), &mut ledger)
            .unwrap_err();
        assert_eq!(err.kind(), "TransferFailed");
        assert_eq!(vault, before);
    }

    #[test]
    fn set_heir_checks_role_before_argument() {
        let mut vault = sample_vault();
        let err = vault.set_heir(&ctx(4, t0()), Address::ZERO).unwrap_err();
        assert_eq!(err.to_string(), "Only the owner can set a new heir.");
    }

    #[test]
    fn set_heir_rejects_owner() {
        let mut vault = sample_vault();
        let err = vault.set_heir(&ctx(1, t0()), addr(1)).unwrap_err();
        assert_eq!(err.to_string(), "Owner cannot be the heir.");
        assert_eq!(vault.heir(), addr(2));
    }

    #[test]
    fn claim_exactly_at_delay_succeeds() {
        let mut vault = sample_vault();
        let at = t0() + inactivity_delay();
        assert!(vault.is_claimable(at));
        assert_eq!(vault.time_until_claimable(at), Duration::zero());

        let events = vault.claim_ownership(&ctx(2, at), addr(3)).unwrap();
        assert_eq!(vault.owner(), addr(2));
        assert_eq!(vault.heir(), addr(3));
        assert_eq!(vault.last_activity(), at);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "OwnershipTransferred");
        assert_eq!(events[1].name(), "HeirChanged");
    }

    #[test]
    fn claim_one_second_early_fails() {
        let mut vault = sample_vault();
        let early = t0() + inactivity_delay() - Duration::seconds(1);
        let err = vault.claim_ownership(&ctx(2, early), addr(3)).unwrap_err();
        assert_eq!(
            err,
            VaultError::OwnerStillActive {
                claimable_at: t0() + inactivity_delay()
            }
        );
        assert_eq!(vault.time_until_claimable(early), Duration::seconds(1));
    }

    #[test]
    fn claim_rejects_self_as_next_heir() {
        let mut vault = sample_vault();
        let at = t0() + inactivity_delay();
        let err = vault.claim_ownership(&ctx(2, at), addr(2)).unwrap_err();
        assert_eq!(err.kind(), "InvalidHeir");
        assert_eq!(vault.owner(), addr(1));
    }

    #[test]
    fn claim_may_name_previous_owner() {
        let mut vault = sample_vault();
        let at = t0() + inactivity_delay();
        vault.claim_ownership(&ctx(2, at), addr(1)).unwrap();
        assert_eq!(vault.heir(), addr(1));
        assert!(vault.check_invariants().is_ok());
    }

    #[test]
    fn activity_never_moves_backwards() {
        let mut vault = sample_vault();
        vault.set_heir(&ctx(1, t0() + Duration::days(2)), addr(3)).unwrap();
        vault.set_heir(&ctx(1, t0() + Duration::days(1)), addr(4)).unwrap();
        assert_eq!(vault.last_activity(), t0() + Duration::days(2));
    }

    #[test]
    fn serde_roundtrip_preserves_invariants() {
        let vault = sample_vault();
        let bytes = bincode::serialize(&vault).unwrap();
        let back: InheritanceVault = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, vault);
        assert!(back.check_invariants().is_ok());
    }
}
