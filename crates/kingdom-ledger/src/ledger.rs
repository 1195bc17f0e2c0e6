//! The shared row store and its transaction entry point.
//!
//! Every row lives behind its own `tokio` mutex. [`Ledger::transact`] locks
//! the requested rows in [`RowKey`] order, hands the closure a staged
//! [`Transaction`], and on `Ok` writes the touched rows back and appends the
//! staged journal entries before releasing any lock. On `Err` nothing is
//! written.
//!
//! # Lock-set widening
//!
//! A closure sometimes learns which rows it needs only after reading others
//! (the holder of a market-maker stake, the destination of a courier job).
//! When a closure touches a key outside its lock set, the accessor fails
//! with [`LedgerError::NotLocked`]. If the closure then returns `Err`, the
//! ledger releases everything, adds the missing keys, and runs the closure
//! again from scratch. Closures are therefore `FnMut` and must not have side
//! effects outside the transaction.
//!
//! # Retention
//!
//! A cell whose row is empty is dropped from the table when the last
//! transaction holding it lets go, so finished jobs and lapsed stakes leave
//! nothing behind. Journal entries stay in memory only until they are
//! marked persisted; a running [`FlowTally`] keeps the audit whole after
//! they are gone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use kingdom_types::{
    Job, LedgerEntry, PlayerAccount, PlayerId, Resource, Settlement, SettlementId,
};

use crate::LedgerError;
use crate::conservation::{ConservationResult, FlowTally};
use crate::row::{Row, RowKey};
use crate::transaction::Transaction;

/// How many times a transaction may widen its lock set before giving up.
const MAX_LOCK_ATTEMPTS: u32 = 4;

type Cell = Arc<Mutex<Option<Row>>>;

type Guard = OwnedMutexGuard<Option<Row>>;

/// Handles on a cell held by the table plus one locked transaction.
const SOLE_HOLDER: usize = 2;

/// Committed journal entries not yet persisted, plus what was dropped.
#[derive(Debug, Default)]
struct Journal {
    /// Entries after the persistence cursor.
    pending: Vec<LedgerEntry>,
    /// Entries already persisted and dropped.
    persisted: usize,
    /// Flows of every committed entry.
    tally: FlowTally,
}

impl Journal {
    fn committed(&self) -> usize {
        self.persisted.saturating_add(self.pending.len())
    }
}

/// The transactional store for every balance in the simulation.
///
/// Rows are created lazily the first time a key is locked and evicted once
/// empty and unheld. An evicted key simply reads as missing, which is what
/// an empty cell would have said.
#[derive(Debug, Default)]
pub struct Ledger {
    rows: Mutex<BTreeMap<RowKey, Cell>>,
    journal: Mutex<Journal>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    async fn cells(&self, keys: &BTreeSet<RowKey>) -> Vec<(RowKey, Cell)> {
        let mut table = self.rows.lock().await;
        keys.iter()
            .map(|key| {
                let cell = table
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(None)));
                (key.clone(), Arc::clone(cell))
            })
            .collect()
    }

    /// Run `f` atomically over the rows named by `keys`.
    ///
    /// Locks are acquired in key order. Concurrent transactions that share a
    /// row serialize; disjoint transactions proceed in parallel.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns on failure, in which case no row or
    /// journal change is applied. Returns [`LedgerError::LockSetUnstable`]
    /// (converted into `E`) if the closure keeps reaching for unlocked rows.
    pub async fn transact<T, E, F>(
        &self,
        keys: impl IntoIterator<Item = RowKey>,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut(&mut Transaction) -> Result<T, E>,
        E: From<LedgerError>,
    {
        let mut keys: BTreeSet<RowKey> = keys.into_iter().collect();

        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            let cells = self.cells(&keys).await;
            let mut guards: Vec<(RowKey, Guard)> = Vec::with_capacity(cells.len());
            for (key, cell) in cells {
                guards.push((key, cell.lock_owned().await));
            }

            let staged = guards
                .iter()
                .map(|(key, guard)| (key.clone(), (**guard).clone()))
                .collect();
            let mut tx = Transaction::new(staged);

            match f(&mut tx) {
                Ok(value) => {
                    let mut commit = tx.into_commit();
                    for (key, guard) in &mut guards {
                        if let Some(row) = commit.rows.remove(key) {
                            **guard = row;
                        }
                    }
                    if !commit.entries.is_empty() {
                        let mut journal = self.journal.lock().await;
                        journal.tally.record(&commit.entries);
                        journal.pending.append(&mut commit.entries);
                    }
                    self.release(guards).await;
                    return Ok(value);
                }
                Err(err) => {
                    let missing = tx.take_missing();
                    if missing.is_empty() {
                        self.release(guards).await;
                        return Err(err);
                    }
                    debug!(
                        attempt,
                        added = missing.len(),
                        "Widening transaction lock set"
                    );
                    self.release(guards).await;
                    keys.extend(missing);
                }
            }
        }

        warn!(
            attempts = MAX_LOCK_ATTEMPTS,
            "Transaction lock set did not settle"
        );
        Err(LedgerError::LockSetUnstable {
            attempts: MAX_LOCK_ATTEMPTS,
        }
        .into())
    }

    /// Unlock `guards`, first evicting every empty cell nobody else holds.
    ///
    /// Anyone else must take the table lock to get a handle, so a count
    /// taken under it cannot race with a new waiter.
    async fn release(&self, guards: Vec<(RowKey, Guard)>) {
        let mut table = self.rows.lock().await;
        for (key, guard) in guards {
            let evict = guard.is_none()
                && table
                    .get(&key)
                    .is_some_and(|cell| Arc::strong_count(cell) == SOLE_HOLDER);
            if evict {
                table.remove(&key);
            }
            drop(guard);
        }
    }

    // -------------------------------------------------------------------
    // Snapshot reads (no transaction)
    // -------------------------------------------------------------------

    /// Read the latest committed value of one row.
    pub async fn read(&self, key: &RowKey) -> Option<Row> {
        let cell = self.rows.lock().await.get(key).map(Arc::clone)?;
        let guard = cell.lock().await;
        guard.clone()
    }

    /// Read every populated row whose key matches `filter`.
    ///
    /// Rows are read one at a time; the result is not a consistent snapshot
    /// across rows and must not feed a debit decision.
    pub async fn scan(&self, filter: impl Fn(&RowKey) -> bool) -> Vec<(RowKey, Row)> {
        let cells: Vec<(RowKey, Cell)> = {
            let table = self.rows.lock().await;
            table
                .iter()
                .filter(|(key, _)| filter(key))
                .map(|(key, cell)| (key.clone(), Arc::clone(cell)))
                .collect()
        };
        let mut out = Vec::with_capacity(cells.len());
        for (key, cell) in cells {
            let row = cell.lock().await.clone();
            if let Some(row) = row {
                out.push((key, row));
            }
        }
        out
    }

    /// Latest committed settlement record.
    pub async fn settlement(&self, id: SettlementId) -> Option<Settlement> {
        match self.read(&RowKey::Settlement(id)).await {
            Some(Row::Settlement(s)) => Some(*s),
            _ => None,
        }
    }

    /// Settlement id registered under a name (case-insensitive).
    pub async fn settlement_by_name(&self, name: &str) -> Option<SettlementId> {
        match self.read(&RowKey::settlement_name(name)).await {
            Some(Row::SettlementName(id)) => Some(id),
            _ => None,
        }
    }

    /// Every settlement, ordered by id.
    pub async fn settlements(&self) -> Vec<Settlement> {
        self.scan(|key| matches!(key, RowKey::Settlement(_)))
            .await
            .into_iter()
            .filter_map(|(_, row)| match row {
                Row::Settlement(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    /// Latest committed player account.
    pub async fn player(&self, id: PlayerId) -> Option<PlayerAccount> {
        match self.read(&RowKey::Player(id)).await {
            Some(Row::Player(p)) => Some(p),
            _ => None,
        }
    }

    /// Every job, ordered by id.
    pub async fn jobs(&self) -> Vec<Job> {
        self.scan(|key| matches!(key, RowKey::Job(_)))
            .await
            .into_iter()
            .filter_map(|(_, row)| match row {
                Row::Job(j) => Some(j),
                _ => None,
            })
            .collect()
    }

    /// Market stock of a resource.
    pub async fn stock(&self, settlement: SettlementId, resource: Resource) -> u64 {
        match self.read(&RowKey::Stock(settlement, resource)).await {
            Some(Row::Stock(q)) => q,
            _ => 0,
        }
    }

    // -------------------------------------------------------------------
    // Journal
    // -------------------------------------------------------------------

    /// Number of journal entries ever committed, persisted ones included.
    pub async fn journal_len(&self) -> usize {
        self.journal.lock().await.committed()
    }

    /// Copy of the committed entries still held in memory.
    ///
    /// Entries drop out once [`Ledger::mark_persisted`] passes them.
    pub async fn journal(&self) -> Vec<LedgerEntry> {
        self.journal.lock().await.pending.clone()
    }

    /// Entries committed since the last [`Ledger::mark_persisted`], with the
    /// cursor to pass back once they are stored.
    pub async fn unpersisted(&self) -> (usize, Vec<LedgerEntry>) {
        let journal = self.journal.lock().await;
        (journal.committed(), journal.pending.clone())
    }

    /// Advance the persistence cursor and drop the entries it passes.
    ///
    /// Entries committed after `cursor` was handed out stay pending.
    pub async fn mark_persisted(&self, cursor: usize) {
        let mut journal = self.journal.lock().await;
        if cursor <= journal.persisted || cursor > journal.committed() {
            return;
        }
        let stored = cursor.saturating_sub(journal.persisted);
        journal.pending.drain(..stored);
        journal.persisted = cursor;
    }

    /// Drop every pending entry without storing it.
    ///
    /// For runs with no archive; the audit tally is kept. Returns how many
    /// entries were dropped.
    pub async fn discard_journal(&self) -> usize {
        let mut journal = self.journal.lock().await;
        let dropped = journal.pending.len();
        journal.pending.clear();
        journal.persisted = journal.persisted.saturating_add(dropped);
        dropped
    }

    /// Check every entry ever committed for conservation.
    pub async fn audit(&self) -> ConservationResult {
        self.journal.lock().await.tally.verify()
    }
}
