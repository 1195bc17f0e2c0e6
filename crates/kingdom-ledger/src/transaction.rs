//! The scoped transactional context handed to [`Ledger::transact`] closures.
//!
//! A [`Transaction`] holds staged copies of every locked row. Closures read
//! and mutate those copies; nothing reaches the shared rows until the
//! closure returns `Ok`. Balance changes go through the money operations
//! here, each of which appends a double-entry [`LedgerEntry`] to the staged
//! journal.
//!
//! [`Ledger::transact`]: crate::Ledger::transact

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use kingdom_types::{
    Account, Asset, EntryKind, GameDay, Job, JobClaim, JobId, LedgerEntry, LedgerEntryId,
    MarketMakerStake, PlayerAccount, PlayerId, Resource, Settlement, SettlementId, Tool,
};

use crate::LedgerError;
use crate::row::{ClaimSlot, Placement, Row, RowKey};

/// Rows and journal entries produced by a successful closure.
pub(crate) struct Commit {
    /// Rows the closure touched through a mutable accessor.
    pub rows: BTreeMap<RowKey, Option<Row>>,
    /// Staged journal entries, in the order they were recorded.
    pub entries: Vec<LedgerEntry>,
}

/// Staged view of a locked row set.
#[derive(Debug)]
pub struct Transaction {
    rows: BTreeMap<RowKey, Option<Row>>,
    dirty: BTreeSet<RowKey>,
    missing: RefCell<BTreeSet<RowKey>>,
    entries: Vec<LedgerEntry>,
    reference_id: Option<Uuid>,
    started_at: DateTime<Utc>,
}

impl Transaction {
    pub(crate) fn new(rows: BTreeMap<RowKey, Option<Row>>) -> Self {
        Self {
            rows,
            dirty: BTreeSet::new(),
            missing: RefCell::new(BTreeSet::new()),
            entries: Vec::new(),
            reference_id: None,
            started_at: Utc::now(),
        }
    }

    /// Keys the closure asked for without holding their lock.
    pub(crate) fn take_missing(&self) -> BTreeSet<RowKey> {
        self.missing.take()
    }

    pub(crate) fn into_commit(mut self) -> Commit {
        let rows = self
            .dirty
            .iter()
            .filter_map(|key| self.rows.remove(key).map(|row| (key.clone(), row)))
            .collect();
        Commit {
            rows,
            entries: self.entries,
        }
    }

    // -------------------------------------------------------------------
    // Untyped access
    // -------------------------------------------------------------------

    /// Whether `key` is part of this transaction's lock set.
    pub fn is_locked(&self, key: &RowKey) -> bool {
        self.rows.contains_key(key)
    }

    /// Read a locked row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotLocked`] if `key` is not in the lock set.
    /// The ledger then widens the lock set and re-runs the closure.
    pub fn get(&self, key: &RowKey) -> Result<Option<&Row>, LedgerError> {
        match self.rows.get(key) {
            Some(slot) => Ok(slot.as_ref()),
            None => Err(self.not_locked(key)),
        }
    }

    /// Mutable access to a locked row slot. Marks the row for write-back.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotLocked`] if `key` is not in the lock set.
    pub fn get_mut(&mut self, key: &RowKey) -> Result<&mut Option<Row>, LedgerError> {
        match self.rows.get_mut(key) {
            Some(slot) => {
                self.dirty.insert(key.clone());
                Ok(slot)
            }
            None => {
                self.missing.borrow_mut().insert(key.clone());
                Err(LedgerError::NotLocked {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Store a row, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotLocked`] if `key` is not in the lock set.
    pub fn put(&mut self, key: &RowKey, row: Row) -> Result<(), LedgerError> {
        *self.get_mut(key)? = Some(row);
        Ok(())
    }

    /// Delete a row, returning its previous value.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotLocked`] if `key` is not in the lock set.
    pub fn remove(&mut self, key: &RowKey) -> Result<Option<Row>, LedgerError> {
        Ok(self.get_mut(key)?.take())
    }

    fn not_locked(&self, key: &RowKey) -> LedgerError {
        self.missing.borrow_mut().insert(key.clone());
        LedgerError::NotLocked {
            key: key.to_string(),
        }
    }

    fn or_insert_with(
        &mut self,
        key: &RowKey,
        default: impl FnOnce() -> Row,
    ) -> Result<&mut Row, LedgerError> {
        Ok(self.get_mut(key)?.get_or_insert_with(default))
    }

    // -------------------------------------------------------------------
    // Typed access
    // -------------------------------------------------------------------

    /// The placement index, if any settlement has been placed.
    pub fn find_placement(&self) -> Result<Option<&Placement>, LedgerError> {
        let key = RowKey::Placement;
        pick(&key, self.get(&key)?, |r| match r {
            Row::Placement(p) => Some(p),
            _ => None,
        })
    }

    /// Mutable placement index, created empty on first use.
    pub fn placement_mut(&mut self) -> Result<&mut Placement, LedgerError> {
        let key = RowKey::Placement;
        match self.or_insert_with(&key, || Row::Placement(Placement::default()))? {
            Row::Placement(p) => Ok(p),
            other => Err(mismatch(&key, other)),
        }
    }

    /// Settlement registered under a name (case-insensitive).
    pub fn find_settlement_name(&self, name: &str) -> Result<Option<SettlementId>, LedgerError> {
        let key = RowKey::settlement_name(name);
        pick(&key, self.get(&key)?, |r| match r {
            Row::SettlementName(id) => Some(id),
            _ => None,
        })
        .map(Option::<&SettlementId>::copied)
    }

    /// Look up a settlement.
    pub fn find_settlement(&self, id: SettlementId) -> Result<Option<&Settlement>, LedgerError> {
        let key = RowKey::Settlement(id);
        pick(&key, self.get(&key)?, |r| match r {
            Row::Settlement(s) => Some(&**s),
            _ => None,
        })
    }

    /// A settlement that must exist.
    pub fn settlement(&self, id: SettlementId) -> Result<&Settlement, LedgerError> {
        self.find_settlement(id)?
            .ok_or_else(|| missing(&RowKey::Settlement(id)))
    }

    /// Mutable access to a settlement that must exist.
    pub fn settlement_mut(&mut self, id: SettlementId) -> Result<&mut Settlement, LedgerError> {
        let key = RowKey::Settlement(id);
        match self.get_mut(&key)? {
            Some(Row::Settlement(s)) => Ok(s),
            Some(other) => Err(mismatch(&key, other)),
            None => Err(missing(&key)),
        }
    }

    /// Insert a settlement together with its name index entry.
    pub fn insert_settlement(&mut self, settlement: Settlement) -> Result<(), LedgerError> {
        let id = settlement.id;
        self.put(
            &RowKey::settlement_name(&settlement.name),
            Row::SettlementName(id),
        )?;
        self.put(&RowKey::Settlement(id), Row::Settlement(Box::new(settlement)))
    }

    /// Look up a player account.
    pub fn find_player(&self, id: PlayerId) -> Result<Option<&PlayerAccount>, LedgerError> {
        let key = RowKey::Player(id);
        pick(&key, self.get(&key)?, |r| match r {
            Row::Player(p) => Some(p),
            _ => None,
        })
    }

    /// A player account that must exist.
    pub fn player(&self, id: PlayerId) -> Result<&PlayerAccount, LedgerError> {
        self.find_player(id)?
            .ok_or_else(|| missing(&RowKey::Player(id)))
    }

    /// Mutable access to a player account that must exist.
    pub fn player_mut(&mut self, id: PlayerId) -> Result<&mut PlayerAccount, LedgerError> {
        let key = RowKey::Player(id);
        match self.get_mut(&key)? {
            Some(Row::Player(p)) => Ok(p),
            Some(other) => Err(mismatch(&key, other)),
            None => Err(missing(&key)),
        }
    }

    /// Insert or replace a player account.
    pub fn insert_player(&mut self, account: PlayerAccount) -> Result<(), LedgerError> {
        self.put(&RowKey::Player(account.id), Row::Player(account))
    }

    /// A player's claim slot (empty when never used).
    pub fn claim_slot(&self, player: PlayerId) -> Result<ClaimSlot, LedgerError> {
        let key = RowKey::ClaimSlot(player);
        pick(&key, self.get(&key)?, |r| match r {
            Row::ClaimSlot(c) => Some(c),
            _ => None,
        })
        .map(|slot| slot.cloned().unwrap_or_default())
    }

    /// Mutable claim slot, created empty on first use.
    pub fn claim_slot_mut(&mut self, player: PlayerId) -> Result<&mut ClaimSlot, LedgerError> {
        let key = RowKey::ClaimSlot(player);
        match self.or_insert_with(&key, || Row::ClaimSlot(ClaimSlot::default()))? {
            Row::ClaimSlot(c) => Ok(c),
            other => Err(mismatch(&key, other)),
        }
    }

    /// Look up a job.
    pub fn find_job(&self, id: JobId) -> Result<Option<&Job>, LedgerError> {
        let key = RowKey::Job(id);
        pick(&key, self.get(&key)?, |r| match r {
            Row::Job(j) => Some(j),
            _ => None,
        })
    }

    /// Insert a job.
    pub fn insert_job(&mut self, job: Job) -> Result<(), LedgerError> {
        self.put(&RowKey::Job(job.id), Row::Job(job))
    }

    /// Delete a job and its active-claim row.
    pub fn remove_job(&mut self, id: JobId) -> Result<(), LedgerError> {
        self.remove(&RowKey::Job(id))?;
        self.remove(&RowKey::JobClaim(id))?;
        Ok(())
    }

    /// The active claim on a job.
    pub fn find_job_claim(&self, job: JobId) -> Result<Option<&JobClaim>, LedgerError> {
        let key = RowKey::JobClaim(job);
        pick(&key, self.get(&key)?, |r| match r {
            Row::JobClaim(c) => Some(c),
            _ => None,
        })
    }

    /// Record the active claim on a job.
    pub fn insert_job_claim(&mut self, claim: JobClaim) -> Result<(), LedgerError> {
        self.put(&RowKey::JobClaim(claim.job), Row::JobClaim(claim))
    }

    /// Clear the active claim on a job.
    pub fn clear_job_claim(&mut self, job: JobId) -> Result<(), LedgerError> {
        self.remove(&RowKey::JobClaim(job))?;
        Ok(())
    }

    /// Market stock of a resource (0 when never stocked).
    pub fn stock(&self, settlement: SettlementId, resource: Resource) -> Result<u64, LedgerError> {
        let key = RowKey::Stock(settlement, resource);
        pick(&key, self.get(&key)?, |r| match r {
            Row::Stock(q) => Some(q),
            _ => None,
        })
        .map(|q| q.copied().unwrap_or(0))
    }

    fn stock_mut(
        &mut self,
        settlement: SettlementId,
        resource: Resource,
    ) -> Result<&mut u64, LedgerError> {
        let key = RowKey::Stock(settlement, resource);
        match self.or_insert_with(&key, || Row::Stock(0))? {
            Row::Stock(q) => Ok(q),
            other => Err(mismatch(&key, other)),
        }
    }

    /// The stake on a resource for a day.
    pub fn find_stake(
        &self,
        settlement: SettlementId,
        resource: Resource,
        day: GameDay,
    ) -> Result<Option<&MarketMakerStake>, LedgerError> {
        let key = RowKey::Stake(settlement, resource, day);
        pick(&key, self.get(&key)?, |r| match r {
            Row::Stake(s) => Some(s),
            _ => None,
        })
    }

    /// Insert a stake.
    pub fn insert_stake(&mut self, stake: MarketMakerStake) -> Result<(), LedgerError> {
        let key = RowKey::Stake(stake.settlement, stake.resource, stake.day);
        self.put(&key, Row::Stake(stake))
    }

    /// The settlement a player has a home in.
    pub fn find_home(&self, player: PlayerId) -> Result<Option<SettlementId>, LedgerError> {
        let key = RowKey::Home(player);
        pick(&key, self.get(&key)?, |r| match r {
            Row::Home(s) => Some(s),
            _ => None,
        })
        .map(Option::<&SettlementId>::copied)
    }

    /// Register a player's home.
    pub fn set_home(&mut self, player: PlayerId, settlement: SettlementId) -> Result<(), LedgerError> {
        self.put(&RowKey::Home(player), Row::Home(settlement))
    }

    // -------------------------------------------------------------------
    // Journal
    // -------------------------------------------------------------------

    /// Attach a related entity to every entry recorded from now on.
    pub const fn reference(&mut self, id: Option<Uuid>) {
        self.reference_id = id;
    }

    /// Staged journal entries so far.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Append a journal entry. Zero amounts are not recorded.
    pub fn record(&mut self, asset: Asset, from: Account, to: Account, amount: u64, kind: EntryKind) {
        if amount == 0 {
            return;
        }
        self.entries.push(LedgerEntry {
            id: LedgerEntryId::new(),
            asset,
            from,
            to,
            amount,
            kind,
            reference_id: self.reference_id,
            created_at: self.started_at,
        });
    }

    // -------------------------------------------------------------------
    // Money operations
    // -------------------------------------------------------------------

    /// Move `amount` of `asset` from one account to another and journal it.
    ///
    /// Tracked accounts (players, treasuries, stock) must hold the asset and
    /// may not go below zero. External accounts (`Market`, `World`, `Void`)
    /// are unbounded counterparties. Zero amounts and self transfers change
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns the matching `Insufficient*` error when the source is short,
    /// and [`LedgerError::UnheldAsset`] when an account cannot hold the
    /// asset at all (gold in a stock row, a tool in a treasury).
    pub fn transfer(
        &mut self,
        asset: Asset,
        from: Account,
        to: Account,
        amount: u64,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        if amount == 0 || from == to {
            return Ok(());
        }
        self.withdraw(from, asset, amount)?;
        self.deposit(to, asset, amount)?;
        self.record(asset, from, to, amount, kind);
        Ok(())
    }

    fn withdraw(&mut self, account: Account, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        match (account, asset) {
            (Account::Market(_) | Account::World | Account::Void, _) => Ok(()),
            (Account::Player(id), Asset::Gold) => {
                let p = self.player_mut(id)?;
                p.gold = p
                    .gold
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientFunds {
                        needed: amount,
                        available: p.gold,
                    })?;
                Ok(())
            }
            (Account::Player(id), Asset::Resource(resource)) => {
                let p = self.player_mut(id)?;
                let held = p.holding(resource);
                let left = held
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientQuantity {
                        resource,
                        needed: amount,
                        available: held,
                    })?;
                if left == 0 {
                    p.inventory.remove(&resource);
                } else {
                    p.inventory.insert(resource, left);
                }
                Ok(())
            }
            (Account::Player(id), Asset::Tool(tool)) => {
                let p = self.player_mut(id)?;
                let held = p.tool_count(tool);
                let left = held
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientTools {
                        tool,
                        needed: amount,
                        available: held,
                    })?;
                if left == 0 {
                    p.tools.remove(&tool);
                } else {
                    p.tools.insert(tool, left);
                }
                Ok(())
            }
            (Account::Treasury(id), Asset::Gold) => {
                let s = self.settlement_mut(id)?;
                s.treasury = s
                    .treasury
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientTreasury {
                        needed: amount,
                        available: s.treasury,
                    })?;
                Ok(())
            }
            (Account::Stock(id), Asset::Resource(resource)) => {
                let stock = self.stock_mut(id, resource)?;
                *stock = stock
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientStock {
                        resource,
                        requested: amount,
                        available: *stock,
                    })?;
                Ok(())
            }
            (account, asset) => Err(LedgerError::UnheldAsset { account, asset }),
        }
    }

    fn deposit(&mut self, account: Account, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        let slot: &mut u64 = match (account, asset) {
            (Account::Market(_) | Account::World | Account::Void, _) => return Ok(()),
            (Account::Player(id), Asset::Gold) => &mut self.player_mut(id)?.gold,
            (Account::Player(id), Asset::Resource(resource)) => {
                self.player_mut(id)?.inventory.entry(resource).or_insert(0)
            }
            (Account::Player(id), Asset::Tool(tool)) => {
                self.player_mut(id)?.tools.entry(tool).or_insert(0)
            }
            (Account::Treasury(id), Asset::Gold) => &mut self.settlement_mut(id)?.treasury,
            (Account::Stock(id), Asset::Resource(resource)) => self.stock_mut(id, resource)?,
            (account, asset) => return Err(LedgerError::UnheldAsset { account, asset }),
        };
        *slot = slot
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Take gold from a player.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientFunds`] if the player holds less
    /// than `amount`.
    pub fn debit_gold(
        &mut self,
        player: PlayerId,
        amount: u64,
        to: Account,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(Asset::Gold, Account::Player(player), to, amount, kind)
    }

    /// Give gold to a player.
    pub fn credit_gold(
        &mut self,
        player: PlayerId,
        amount: u64,
        from: Account,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(Asset::Gold, from, Account::Player(player), amount, kind)
    }

    /// Take resource units from a player.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientQuantity`] if the player carries
    /// fewer than `quantity` units.
    pub fn take_resource(
        &mut self,
        player: PlayerId,
        resource: Resource,
        quantity: u64,
        to: Account,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(
            Asset::Resource(resource),
            Account::Player(player),
            to,
            quantity,
            kind,
        )
    }

    /// Give resource units to a player.
    pub fn give_resource(
        &mut self,
        player: PlayerId,
        resource: Resource,
        quantity: u64,
        from: Account,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(
            Asset::Resource(resource),
            from,
            Account::Player(player),
            quantity,
            kind,
        )
    }

    /// Give tools to a player.
    pub fn give_tool(
        &mut self,
        player: PlayerId,
        tool: Tool,
        quantity: u64,
        from: Account,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(Asset::Tool(tool), from, Account::Player(player), quantity, kind)
    }

    /// Move gold between two players.
    pub fn transfer_gold(
        &mut self,
        from: PlayerId,
        to: PlayerId,
        amount: u64,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(
            Asset::Gold,
            Account::Player(from),
            Account::Player(to),
            amount,
            kind,
        )
    }

    /// Add units to market stock. Returns the stock afterwards.
    pub fn add_stock(
        &mut self,
        settlement: SettlementId,
        resource: Resource,
        quantity: u64,
        from: Account,
        kind: EntryKind,
    ) -> Result<u64, LedgerError> {
        self.transfer(
            Asset::Resource(resource),
            from,
            Account::Stock(settlement),
            quantity,
            kind,
        )?;
        self.stock(settlement, resource)
    }

    /// Remove units from market stock. Returns the stock afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientStock`] if the market holds fewer
    /// than `quantity` units.
    pub fn take_stock(
        &mut self,
        settlement: SettlementId,
        resource: Resource,
        quantity: u64,
        to: Account,
        kind: EntryKind,
    ) -> Result<u64, LedgerError> {
        self.transfer(
            Asset::Resource(resource),
            Account::Stock(settlement),
            to,
            quantity,
            kind,
        )?;
        self.stock(settlement, resource)
    }

    /// Pay gold out of a treasury.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientTreasury`] if the treasury holds
    /// less than `amount`.
    pub fn debit_treasury(
        &mut self,
        settlement: SettlementId,
        amount: u64,
        to: Account,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(Asset::Gold, Account::Treasury(settlement), to, amount, kind)
    }

    /// Pay gold into a treasury.
    pub fn credit_treasury(
        &mut self,
        settlement: SettlementId,
        amount: u64,
        from: Account,
        kind: EntryKind,
    ) -> Result<(), LedgerError> {
        self.transfer(Asset::Gold, from, Account::Treasury(settlement), amount, kind)
    }
}

fn pick<'r, T: ?Sized>(
    key: &RowKey,
    row: Option<&'r Row>,
    select: impl FnOnce(&'r Row) -> Option<&'r T>,
) -> Result<Option<&'r T>, LedgerError> {
    match row {
        None => Ok(None),
        Some(r) => select(r).map(Some).ok_or_else(|| mismatch(key, r)),
    }
}

fn mismatch(key: &RowKey, found: &Row) -> LedgerError {
    LedgerError::RowTypeMismatch {
        key: key.to_string(),
        found: found.kind(),
    }
}

fn missing(key: &RowKey) -> LedgerError {
    LedgerError::RowMissing {
        key: key.to_string(),
    }
}
