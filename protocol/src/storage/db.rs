//! # VaultDB: Persistent Storage Engine
//!
//! Built on sled's embedded key-value store. Everything a node needs to
//! come back after a restart flows through here.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                  | Value                 |
//! |------------|----------------------|-----------------------|
//! | `state`    | key (UTF-8)          | `bincode(T)`          |
//! | `events`   | `seq` (8B BE)        | `bincode(Event)`      |
//! | `accounts` | `address` (20B)      | `bincode(Amount)`     |
//! | `nonces`   | `address` (20B)      | `nonce` (8B BE)       |
//!
//! Event sequence numbers are stored big-endian so sled's lexicographic
//! ordering matches numeric ordering and range scans come back in order.
//!
//! ## Atomicity
//!
//! A successful vault call touches several trees at once. [`VaultDB::commit`]
//! applies a [`Commit`] as one multi-tree sled transaction: the vault
//! record, changed balances, new events and the consumed nonce land
//! together or not at all.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use crate::amount::Amount;
use crate::identity::Address;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<TransactionError<DbError>> for DbError {
    fn from(err: TransactionError<DbError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => DbError::Sled(e),
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode_u64(bytes: &[u8]) -> DbResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid u64 bytes".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Everything one successful call writes, pre-encoded.
///
/// Build it with the typed helpers, then hand it to [`VaultDB::commit`].
#[derive(Debug, Default)]
pub struct Commit {
    state: Vec<(String, Vec<u8>)>,
    accounts: Vec<(Address, Amount)>,
    events: Vec<Vec<u8>>,
    nonces: Vec<(Address, u64)>,
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_state<T: Serialize>(mut self, key: &str, value: &T) -> DbResult<Self> {
        self.state.push((key.to_string(), encode(value)?));
        Ok(self)
    }

    pub fn put_account(mut self, address: Address, balance: Amount) -> Self {
        self.accounts.push((address, balance));
        self
    }

    pub fn append_event<T: Serialize>(mut self, event: &T) -> DbResult<Self> {
        self.events.push(encode(event)?);
        Ok(self)
    }

    pub fn set_nonce(mut self, address: Address, nonce: u64) -> Self {
        self.nonces.push((address, nonce));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
            && self.accounts.is_empty()
            && self.events.is_empty()
            && self.nonces.is_empty()
    }
}

// ---------------------------------------------------------------------------
// VaultDB
// ---------------------------------------------------------------------------

/// Persistent storage for one vault deployment.
///
/// sled is thread-safe, so `VaultDB` is cheap to clone and share. Callers
/// that need ordering between a read and a write (the host does) must
/// serialize access themselves.
#[derive(Debug, Clone)]
pub struct VaultDB {
    db: Db,
    /// Vault record and deployment metadata, by name.
    state: Tree,
    /// Emitted events by sequence number.
    events: Tree,
    /// External account balances.
    accounts: Tree,
    /// Next expected signed-call nonce per address.
    nonces: Tree,
}

impl VaultDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database, removed when dropped. For tests and dev runs.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let state = db.open_tree("state")?;
        let events = db.open_tree("events")?;
        let accounts = db.open_tree("accounts")?;
        let nonces = db.open_tree("nonces")?;

        Ok(Self {
            db,
            state,
            events,
            accounts,
            nonces,
        })
    }

    // -- State --------------------------------------------------------------

    pub fn put_state<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        self.state.insert(key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.state.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`get_state`](Self::get_state) but missing keys are an error.
    pub fn require_state<T: DeserializeOwned>(&self, key: &str) -> DbResult<T> {
        self.get_state(key)?
            .ok_or_else(|| DbError::NotFound(key.to_string()))
    }

    pub fn has_state(&self, key: &str) -> DbResult<bool> {
        Ok(self.state.contains_key(key.as_bytes())?)
    }

    // -- Events -------------------------------------------------------------

    /// Sequence number the next appended event will get.
    pub fn next_event_seq(&self) -> DbResult<u64> {
        match self.events.last()? {
            Some((key, _)) => Ok(decode_u64(&key)? + 1),
            None => Ok(0),
        }
    }

    /// Up to `limit` events starting at sequence `from`, in order.
    pub fn get_events<T: DeserializeOwned>(
        &self,
        from: u64,
        limit: usize,
    ) -> DbResult<Vec<(u64, T)>> {
        let mut out = Vec::new();
        for result in self.events.range(from.to_be_bytes()..).take(limit) {
            let (key, value) = result?;
            out.push((decode_u64(&key)?, decode(&value)?));
        }
        Ok(out)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    // -- Accounts -----------------------------------------------------------

    pub fn put_account(&self, address: &Address, balance: Amount) -> DbResult<()> {
        self.accounts.insert(address.as_bytes(), encode(&balance)?)?;
        Ok(())
    }

    pub fn get_account(&self, address: &Address) -> DbResult<Option<Amount>> {
        match self.accounts.get(address.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every stored account, in address order.
    pub fn accounts(&self) -> DbResult<Vec<(Address, Amount)>> {
        let mut out = Vec::with_capacity(self.accounts.len());
        for result in self.accounts.iter() {
            let (key, value) = result?;
            let bytes: [u8; 20] = key
                .as_ref()
                .try_into()
                .map_err(|_| DbError::Serialization("invalid address key".to_string()))?;
            out.push((Address::from_bytes(bytes), decode(&value)?));
        }
        Ok(out)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    // -- Nonces -------------------------------------------------------------

    /// Next expected nonce for `address`. Zero for addresses never seen.
    pub fn get_nonce(&self, address: &Address) -> DbResult<u64> {
        match self.nonces.get(address.as_bytes())? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    // -- Commit -------------------------------------------------------------

    /// Applies `commit` atomically across all trees and flushes.
    ///
    /// Returns the sequence numbers assigned to the commit's events.
    pub fn commit(&self, commit: Commit) -> DbResult<Vec<u64>> {
        if commit.is_empty() {
            return Ok(Vec::new());
        }

        let first_seq = self.next_event_seq()?;
        let seqs: Vec<u64> = (first_seq..first_seq + commit.events.len() as u64).collect();

        (&self.state, &self.events, &self.accounts, &self.nonces).transaction(
            |(state, events, accounts, nonces)| {
                for (key, bytes) in &commit.state {
                    state.insert(key.as_bytes(), bytes.as_slice())?;
                }
                for (seq, bytes) in seqs.iter().zip(&commit.events) {
                    events.insert(seq.to_be_bytes().to_vec(), bytes.as_slice())?;
                }
                for (address, balance) in &commit.accounts {
                    let bytes = encode(balance).map_err(ConflictableTransactionError::Abort)?;
                    accounts.insert(&address.as_bytes()[..], bytes)?;
                }
                for (address, nonce) in &commit.nonces {
                    nonces.insert(&address.as_bytes()[..], nonce.to_be_bytes().to_vec())?;
                }
                Ok(())
            },
        )?;

        self.db.flush()?;
        tracing::debug!(
            state = commit.state.len(),
            accounts = commit.accounts.len(),
            events = seqs.len(),
            nonces = commit.nonces.len(),
            "commit applied"
        );
        Ok(seqs)
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        owner: Address,
        balance: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Event {
        Deposited { amount: Amount },
        Withdrawn { amount: Amount },
    }

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn coins(n: u128) -> Amount {
        Amount::from_coins(n).unwrap()
    }

    #[test]
    fn open_temporary_database() {
        let db = VaultDB::open_temporary().expect("should create temp db");
        assert_eq!(db.event_count(), 0);
        assert_eq!(db.account_count(), 0);
        assert_eq!(db.next_event_seq().unwrap(), 0);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = Record {
            owner: addr(1),
            balance: coins(1),
        };
        {
            let db = VaultDB::open(dir.path()).expect("should open db");
            db.put_state("vault", &record).unwrap();
            db.flush().unwrap();
        }

        let db = VaultDB::open(dir.path()).expect("should reopen db");
        let back: Record = db.require_state("vault").unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn missing_state_is_none_or_not_found() {
        let db = VaultDB::open_temporary().unwrap();
        assert!(db.get_state::<Record>("vault").unwrap().is_none());
        assert!(!db.has_state("vault").unwrap());
        assert!(matches!(
            db.require_state::<Record>("vault"),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn events_are_sequenced_and_paged() {
        let db = VaultDB::open_temporary().unwrap();
        for i in 0..5u128 {
            let commit = Commit::new()
                .append_event(&Event::Deposited { amount: coins(i) })
                .unwrap();
            assert_eq!(db.commit(commit).unwrap(), vec![i as u64]);
        }

        let page: Vec<(u64, Event)> = db.get_events(2, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0], (2, Event::Deposited { amount: coins(2) }));
        assert_eq!(page[1].0, 3);

        let tail: Vec<(u64, Event)> = db.get_events(4, 100).unwrap();
        assert_eq!(tail.len(), 1);
        assert!(db.get_events::<Event>(10, 10).unwrap().is_empty());
    }

    #[test]
    fn accounts_crud() {
        let db = VaultDB::open_temporary().unwrap();
        assert!(db.get_account(&addr(1)).unwrap().is_none());

        db.put_account(&addr(2), coins(2)).unwrap();
        db.put_account(&addr(1), coins(1)).unwrap();
        assert_eq!(db.get_account(&addr(1)).unwrap(), Some(coins(1)));

        let all = db.accounts().unwrap();
        assert_eq!(all, vec![(addr(1), coins(1)), (addr(2), coins(2))]);
    }

    #[test]
    fn commit_writes_every_tree() {
        let db = VaultDB::open_temporary().unwrap();
        let first = Commit::new()
            .append_event(&Event::Deposited { amount: coins(3) })
            .unwrap();
        db.commit(first).unwrap();

        let record = Record {
            owner: addr(1),
            balance: coins(2),
        };
        let commit = Commit::new()
            .put_state("vault", &record)
            .unwrap()
            .put_account(addr(1), coins(7))
            .append_event(&Event::Withdrawn { amount: coins(1) })
            .unwrap()
            .set_nonce(addr(1), 1);

        let seqs = db.commit(commit).unwrap();
        assert_eq!(seqs, vec![1]);
        assert_eq!(db.require_state::<Record>("vault").unwrap(), record);
        assert_eq!(db.get_account(&addr(1)).unwrap(), Some(coins(7)));
        assert_eq!(db.get_nonce(&addr(1)).unwrap(), 1);
        assert_eq!(db.get_nonce(&addr(2)).unwrap(), 0);

        let events: Vec<(u64, Event)> = db.get_events(0, 10).unwrap();
        assert_eq!(events[1], (1, Event::Withdrawn { amount: coins(1) }));
    }

    #[test]
    fn empty_commit_is_noop() {
        let db = VaultDB::open_temporary().unwrap();
        assert!(db.commit(Commit::new()).unwrap().is_empty());
        assert_eq!(db.event_count(), 0);
    }
}
