//! # Vault Host
//!
//! Owns the deployed vault and runs every call against it. One call at a
//! time: each takes the host lock, snapshots the vault and the ledger,
//! dispatches, and then either commits everything (vault record, touched
//! balances, events, consumed nonce) in one database transaction or puts
//! the snapshot back and writes nothing.
//!
//! Events are broadcast to subscribers only after they are durable.
//!
//! Callers reach the host two ways:
//!
//! - **Unlocked accounts**: addresses whose keys this node holds (the
//!   owner key written at deploy time, plus dev accounts in `--dev` mode).
//!   The API may act as them without a signature.
//! - **Signed calls**: an Ed25519 [`SignedCall`] from anyone, carrying the
//!   next nonce for the signer's address.

use chrono::{DateTime, Utc};
use heirloom_contracts::{
    CallContext, CallError, InheritanceVault, InvariantViolation, SignedCall, VaultCall,
    VaultError, VaultEvent,
};
use heirloom_protocol::config::INACTIVITY_DELAY_SECS;
use heirloom_protocol::storage::{Commit, DbError, VaultDB};
use heirloom_protocol::{
    Address, Amount, Clock, ClockOverflow, LedgerError, ManualClock, NativeLedger,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::metrics::SharedMetrics;

/// State key of the vault record.
pub const VAULT_KEY: &str = "vault";
/// State key of the deployment metadata.
pub const DEPLOYMENT_KEY: &str = "deployment";
/// State key of the dev clock's accumulated offset, in seconds.
pub const DEV_CLOCK_OFFSET_KEY: &str = "dev_clock_offset_secs";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The vault rejected the call.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// The signed envelope failed verification.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The caller's external account couldn't cover the attached value.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Db(#[from] DbError),

    /// A stored vault record fails its invariants.
    #[error("stored vault is corrupt: {0}")]
    Corrupt(#[from] InvariantViolation),

    #[error("nonce mismatch for {address}: expected {expected}, got {got}")]
    NonceMismatch {
        address: Address,
        expected: u64,
        got: u64,
    },

    #[error("account {0} is not unlocked on this node")]
    AccountLocked(Address),

    #[error(transparent)]
    Clock(#[from] ClockOverflow),

    #[error("dev clock is disabled; start the node with --dev")]
    DevClockDisabled,

    #[error("no vault deployed in this data directory")]
    NotDeployed,

    #[error("a vault is already deployed in this data directory")]
    AlreadyDeployed,
}

impl HostError {
    /// Stable error class for API payloads and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::Vault(e) => e.kind(),
            HostError::Call(CallError::BadSignature { .. }) => "BadSignature",
            HostError::Call(CallError::Encoding(_)) => "Encoding",
            HostError::Ledger(LedgerError::InsufficientFunds { .. }) => "InsufficientFunds",
            HostError::Ledger(_) => "LedgerRejected",
            HostError::Db(_) => "Storage",
            HostError::Corrupt(_) => "Corrupt",
            HostError::NonceMismatch { .. } => "NonceMismatch",
            HostError::AccountLocked(_) => "AccountLocked",
            HostError::Clock(_) => "ClockOverflow",
            HostError::DevClockDisabled => "DevClockDisabled",
            HostError::NotDeployed => "NotDeployed",
            HostError::AlreadyDeployed => "AlreadyDeployed",
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A persisted, sequenced vault event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: VaultEvent,
}

/// Read-only view of the vault for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultInfo {
    pub vault_id: String,
    pub owner: Address,
    pub heir: Address,
    /// Base units, as a decimal string.
    pub balance: Amount,
    /// Whole coins, e.g. `"0.001"`.
    pub balance_formatted: String,
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub claimable_at: DateTime<Utc>,
    pub claimable: bool,
    pub seconds_until_claimable: i64,
    pub inactivity_delay_secs: i64,
    /// The host's current time. Differs from wall-clock time in dev mode.
    pub now: DateTime<Utc>,
}

impl VaultInfo {
    pub fn from_vault(vault: &InheritanceVault, now: DateTime<Utc>) -> Self {
        Self {
            vault_id: vault.vault_id().to_string(),
            owner: vault.owner(),
            heir: vault.heir(),
            balance: vault.balance(),
            balance_formatted: vault.balance().to_decimal_string(),
            total_deposited: vault.total_deposited(),
            total_withdrawn: vault.total_withdrawn(),
            created_at: vault.created_at(),
            last_activity: vault.last_activity(),
            claimable_at: vault.claimable_at(),
            claimable: vault.is_claimable(now),
            seconds_until_claimable: vault.time_until_claimable(now).num_seconds(),
            inactivity_delay_secs: INACTIVITY_DELAY_SECS,
            now,
        }
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReceipt {
    pub call: String,
    pub caller: Address,
    pub events: Vec<EventRecord>,
    pub vault: VaultInfo,
}

struct HostState {
    vault: InheritanceVault,
    ledger: NativeLedger,
}

// ---------------------------------------------------------------------------
// VaultHost
// ---------------------------------------------------------------------------

/// The single execution environment for a deployed vault.
pub struct VaultHost {
    state: Mutex<HostState>,
    db: VaultDB,
    clock: Arc<dyn Clock>,
    /// Present only in dev mode.
    dev_clock: Option<ManualClock>,
    unlocked: BTreeSet<Address>,
    event_tx: broadcast::Sender<EventRecord>,
    metrics: SharedMetrics,
}

impl VaultHost {
    /// Loads the deployed vault and ledger from `db`.
    ///
    /// In dev mode pass the [`ManualClock`] as `dev_clock`; it becomes the
    /// host's time source and `increase_time` is enabled. Any offset
    /// accumulated by earlier dev runs is re-applied.
    pub fn load(
        db: VaultDB,
        system_clock: Arc<dyn Clock>,
        dev_clock: Option<ManualClock>,
        unlocked: BTreeSet<Address>,
        event_tx: broadcast::Sender<EventRecord>,
        metrics: SharedMetrics,
    ) -> HostResult<Self> {
        let vault: InheritanceVault = db.get_state(VAULT_KEY)?.ok_or(HostError::NotDeployed)?;
        vault.check_invariants()?;

        let mut ledger = NativeLedger::new();
        for (address, balance) in db.accounts()? {
            ledger.credit(&address, balance)?;
        }

        let clock: Arc<dyn Clock> = match &dev_clock {
            Some(manual) => {
                let offset: i64 = db.get_state(DEV_CLOCK_OFFSET_KEY)?.unwrap_or(0);
                manual.advance_secs(offset)?;
                Arc::new(manual.clone())
            }
            None => system_clock,
        };

        metrics.observe_vault(&vault, clock.now());
        info!(
            vault_id = vault.vault_id(),
            owner = %vault.owner(),
            heir = %vault.heir(),
            balance = %vault.balance(),
            unlocked = unlocked.len(),
            dev = dev_clock.is_some(),
            "vault loaded"
        );

        Ok(Self {
            state: Mutex::new(HostState { vault, ledger }),
            db,
            clock,
            dev_clock,
            unlocked,
            event_tx,
            metrics,
        })
    }

    // -- Reads --------------------------------------------------------------

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn info(&self) -> VaultInfo {
        let state = self.state.lock();
        VaultInfo::from_vault(&state.vault, self.clock.now())
    }

    pub fn owner(&self) -> Address {
        self.state.lock().vault.owner()
    }

    pub fn heir(&self) -> Address {
        self.state.lock().vault.heir()
    }

    pub fn balance(&self) -> Amount {
        self.state.lock().vault.balance()
    }

    pub fn account_balance(&self, address: &Address) -> Amount {
        self.state.lock().ledger.balance_of(address)
    }

    pub fn nonce(&self, address: &Address) -> HostResult<u64> {
        Ok(self.db.get_nonce(address)?)
    }

    pub fn is_unlocked(&self, address: &Address) -> bool {
        self.unlocked.contains(address)
    }

    pub fn unlocked_accounts(&self) -> Vec<Address> {
        self.unlocked.iter().copied().collect()
    }

    pub fn is_dev(&self) -> bool {
        self.dev_clock.is_some()
    }

    pub fn events(&self, from: u64, limit: usize) -> HostResult<Vec<EventRecord>> {
        let records: Vec<(u64, EventRecord)> = self.db.get_events(from, limit)?;
        Ok(records.into_iter().map(|(_, r)| r).collect())
    }

    pub fn event_count(&self) -> usize {
        self.db.event_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.event_tx.subscribe()
    }

    // -- Calls --------------------------------------------------------------

    /// Runs `call` as an account this node holds the key for.
    pub fn call_as(&self, from: Address, call: VaultCall) -> HostResult<CallReceipt> {
        if !self.is_unlocked(&from) {
            self.metrics.record_rejection("AccountLocked");
            warn!(from = %from, call = call.name(), "call from locked account refused");
            return Err(HostError::AccountLocked(from));
        }
        self.execute(from, call, None)
    }

    /// Verifies and runs a signed call. The nonce is consumed only if the
    /// call succeeds.
    pub fn submit_signed(&self, signed: SignedCall) -> HostResult<CallReceipt> {
        let caller = match signed.verify() {
            Ok(caller) => caller,
            Err(e) => {
                self.metrics.record_rejection("BadSignature");
                warn!(error = %e, "signed call rejected");
                return Err(e.into());
            }
        };
        self.execute(caller, signed.call, Some(signed.nonce))
    }

    fn execute(
        &self,
        caller: Address,
        call: VaultCall,
        nonce: Option<u64>,
    ) -> HostResult<CallReceipt> {
        let started = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = self.clock.now();

        let result = self.apply(state, caller, &call, nonce, now);
        self.metrics
            .call_latency_seconds
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(events) => {
                for record in &events {
                    self.metrics.record_event(&record.event);
                    // No subscribers is not an error.
                    let _ = self.event_tx.send(record.clone());
                }
                self.metrics.observe_vault(&state.vault, now);
                info!(
                    call = call.name(),
                    caller = %caller,
                    events = events.len(),
                    balance = %state.vault.balance(),
                    "vault call applied"
                );
                Ok(CallReceipt {
                    call: call.name().to_string(),
                    caller,
                    events,
                    vault: VaultInfo::from_vault(&state.vault, now),
                })
            }
            Err(e) => {
                self.metrics.record_rejection(e.kind());
                warn!(call = call.name(), caller = %caller, error = %e, "vault call rejected");
                Err(e)
            }
        }
    }

    /// Dispatches and commits under the lock. On any error the in-memory
    /// state is exactly what it was on entry.
    fn apply(
        &self,
        state: &mut HostState,
        caller: Address,
        call: &VaultCall,
        nonce: Option<u64>,
        now: DateTime<Utc>,
    ) -> HostResult<Vec<EventRecord>> {
        if let Some(got) = nonce {
            let expected = self.db.get_nonce(&caller)?;
            if got != expected {
                return Err(HostError::NonceMismatch {
                    address: caller,
                    expected,
                    got,
                });
            }
        }

        let vault_snapshot = state.vault.clone();
        let ledger_snapshot = state.ledger.clone();
        let restore = |state: &mut HostState| {
            state.vault = vault_snapshot.clone();
            state.ledger = ledger_snapshot.clone();
        };

        // Value attached to the call leaves the caller's account first.
        if let Some(value) = call.attached_value() {
            state.ledger.debit(&caller, value)?;
        }

        let ctx = CallContext::new(caller, now);
        let events = match call.dispatch(&mut state.vault, &ctx, &mut state.ledger) {
            Ok(events) => events,
            Err(e) => {
                restore(state);
                return Err(e.into());
            }
        };

        let mut commit = match Commit::new().put_state(VAULT_KEY, &state.vault) {
            Ok(c) => c,
            Err(e) => {
                restore(state);
                return Err(e.into());
            }
        };
        for (address, balance) in state.ledger.accounts() {
            if ledger_snapshot.balance_of(address) != *balance {
                commit = commit.put_account(*address, *balance);
            }
        }
        if let Some(n) = nonce {
            commit = commit.set_nonce(caller, n + 1);
        }

        let records = match self.persist(commit, &events, now) {
            Ok(records) => records,
            Err(e) => {
                restore(state);
                return Err(e);
            }
        };
        debug!(call = call.name(), seqs = records.len(), "call committed");
        Ok(records)
    }

    fn persist(
        &self,
        mut commit: Commit,
        events: &[VaultEvent],
        now: DateTime<Utc>,
    ) -> HostResult<Vec<EventRecord>> {
        let first_seq = self.db.next_event_seq()?;
        let records: Vec<EventRecord> = events
            .iter()
            .enumerate()
            .map(|(i, event)| EventRecord {
                seq: first_seq + i as u64,
                timestamp: now,
                event: event.clone(),
            })
            .collect();
        for record in &records {
            commit = commit.append_event(record)?;
        }
        self.db.commit(commit)?;
        Ok(records)
    }

    // -- Dev ----------------------------------------------------------------

    /// Moves the dev clock forward by `secs` and persists the offset so a
    /// restart keeps the advanced time. Returns the new instant.
    pub fn increase_time(&self, secs: i64) -> HostResult<DateTime<Utc>> {
        let clock = self.dev_clock.as_ref().ok_or(HostError::DevClockDisabled)?;
        let secs = secs.max(0);

        // Hold the lock so a concurrent call sees either the old or new time.
        let state = self.state.lock();
        let offset: i64 = self.db.get_state(DEV_CLOCK_OFFSET_KEY)?.unwrap_or(0);
        let now = clock.after_secs(secs)?;
        let offset = offset.checked_add(secs).ok_or(ClockOverflow { secs })?;
        self.db.put_state(DEV_CLOCK_OFFSET_KEY, &offset)?;
        self.db.flush()?;
        clock.set(now);
        self.metrics.observe_vault(&state.vault, now);

        info!(secs, now = %now, "dev clock advanced");
        Ok(now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
