//! # Native Ledger
//!
//! Balances of the external accounts that value moves between: the
//! deployer funding the vault, depositors, and whoever withdraws. The vault
//! holds its own balance; the ledger holds everyone else's.
//!
//! The vault pushes value out through the [`TransferSink`] trait. A sink
//! gets `&mut self` and an amount, and nothing else. It cannot reach back
//! into the vault that called it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::amount::Amount;
use crate::identity::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The debited account doesn't hold enough.
    #[error("account {account} has {available}, needs {required}")]
    InsufficientFunds {
        account: Address,
        available: Amount,
        required: Amount,
    },

    /// Crediting would overflow the account balance.
    #[error("balance overflow crediting account {0}")]
    Overflow(Address),

    /// The recipient cannot receive value.
    #[error("account {0} rejects incoming transfers")]
    Rejected(Address),
}

// ---------------------------------------------------------------------------
// TransferSink
// ---------------------------------------------------------------------------

/// Destination for value leaving the vault.
pub trait TransferSink {
    /// Pays `amount` to `to`. On error nothing was paid.
    fn transfer(&mut self, to: &Address, amount: Amount) -> Result<(), LedgerError>;
}

// ---------------------------------------------------------------------------
// NativeLedger
// ---------------------------------------------------------------------------

/// In-memory map of external account balances.
///
/// Accounts that have never been credited read as zero. Addresses listed as
/// rejecting refuse incoming transfers, which is how the host and tests
/// exercise the vault's transfer-failure rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeLedger {
    balances: BTreeMap<Address, Amount>,
    #[serde(default)]
    rejecting: Vec<Address>,
}

impl NativeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(Amount::ZERO)
    }

    pub fn credit(&mut self, account: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let updated = self
            .balance_of(account)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(*account))?;
        self.balances.insert(*account, updated);
        Ok(updated)
    }

    pub fn debit(&mut self, account: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let available = self.balance_of(account);
        let updated = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                account: *account,
                available,
                required: amount,
            })?;
        self.balances.insert(*account, updated);
        Ok(updated)
    }

    /// Marks `account` as refusing incoming transfers (or clears the mark).
    pub fn set_rejecting(&mut self, account: Address, rejecting: bool) {
        self.rejecting.retain(|a| *a != account);
        if rejecting {
            self.rejecting.push(account);
        }
    }

    pub fn is_rejecting(&self, account: &Address) -> bool {
        self.rejecting.contains(account)
    }

    /// Every account with a recorded balance, in address order.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }
}

impl TransferSink for NativeLedger {
    fn transfer(&mut self, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        if self.is_rejecting(to) {
            return Err(LedgerError::Rejected(*to));
        }
        self.credit(to, amount).map(|_| ())
    }
}
