//! Transactional balance substrate for the Kingdom simulation.
//!
//! Every gold coin, resource unit, and tool in the simulation changes hands
//! through this crate. Operations run inside [`Ledger::transact`], which
//! locks the rows they touch, applies all changes atomically, and records a
//! double-entry journal of what moved.
//!
//! # Architecture
//!
//! - [`row`] -- [`RowKey`] addresses and typed [`Row`] records.
//! - [`ledger`] -- The [`Ledger`]: per-row locks, `transact`, snapshot reads,
//!   and the committed journal.
//! - [`transaction`] -- The staged [`Transaction`] with typed accessors and
//!   money operations (conditional debits, credits, stock moves).
//! - [`conservation`] -- Journal balance verification and reconciliation.
//!
//! # Guarantees
//!
//! - **Atomic**: a closure's changes land together or not at all.
//! - **Isolated**: transactions sharing a row serialize; the rest run in
//!   parallel. Locks are taken in [`RowKey`] order.
//! - **Non-negative**: debits below zero fail with a typed error instead of
//!   wrapping.
//! - **Journaled**: every balance change has a matching [`LedgerEntry`]
//!   whose flows sum to zero per asset.
//!
//! # Usage
//!
//! ```
//! use kingdom_ledger::{Ledger, LedgerError, RowKey};
//! use kingdom_types::{Account, EntryKind, PlayerAccount, PlayerId, SettlementId};
//!
//! # tokio::runtime::Builder::new_current_thread().build().map(|rt| rt.block_on(async {
//! let ledger = Ledger::new();
//! let ada = PlayerAccount::new(PlayerId::new(), "ada".to_owned(), SettlementId::new());
//! let id = ada.id;
//!
//! ledger
//!     .transact([RowKey::Player(id)], |tx| {
//!         tx.insert_player(ada.clone())?;
//!         tx.credit_gold(id, 25, Account::World, EntryKind::Grant)?;
//!         Ok::<_, LedgerError>(())
//!     })
//!     .await
//!     .ok();
//!
//! assert_eq!(ledger.player(id).await.map(|p| p.gold), Some(25));
//! # })).ok();
//! ```
//!
//! [`LedgerEntry`]: kingdom_types::LedgerEntry

pub mod conservation;
pub mod ledger;
pub mod row;
pub mod transaction;

// Re-export primary types at crate root.
pub use conservation::{ConservationResult, FlowTally};
pub use ledger::Ledger;
pub use row::{ClaimSlot, Placement, Row, RowKey};
pub use transaction::Transaction;

use std::collections::BTreeMap;

use kingdom_types::{Account, Asset, ErrorKind, Resource, Tool};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised inside a transaction.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A player tried to spend more gold than they hold.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Gold required.
        needed: u64,
        /// Gold held.
        available: u64,
    },

    /// A treasury tried to pay more than it holds.
    #[error("insufficient treasury: need {needed}, have {available}")]
    InsufficientTreasury {
        /// Gold required.
        needed: u64,
        /// Gold in the treasury.
        available: u64,
    },

    /// A player tried to hand over more of a resource than they carry.
    #[error("insufficient {resource}: need {needed}, have {available}")]
    InsufficientQuantity {
        /// The resource.
        resource: Resource,
        /// Units required.
        needed: u64,
        /// Units carried.
        available: u64,
    },

    /// A player tried to hand over more tools than they own.
    #[error("insufficient {tool}: need {needed}, have {available}")]
    InsufficientTools {
        /// The tool.
        tool: Tool,
        /// Units required.
        needed: u64,
        /// Units owned.
        available: u64,
    },

    /// A purchase asked for more than the market holds.
    #[error("market only has {available} {resource} (asked for {requested})")]
    InsufficientStock {
        /// The resource.
        resource: Resource,
        /// Units requested.
        requested: u64,
        /// Units in stock.
        available: u64,
    },

    /// The account has no balance of this asset.
    #[error("{account:?} cannot hold {asset:?}")]
    UnheldAsset {
        /// The account.
        account: Account,
        /// The asset.
        asset: Asset,
    },

    /// A row that must exist is empty.
    #[error("row not found: {key}")]
    RowMissing {
        /// The row key.
        key: String,
    },

    /// A row was accessed outside the transaction's lock set.
    #[error("row not locked by this transaction: {key}")]
    NotLocked {
        /// The row key.
        key: String,
    },

    /// A row holds a different record type than its key implies.
    #[error("row {key} holds a {found} record")]
    RowTypeMismatch {
        /// The row key.
        key: String,
        /// Variant actually stored.
        found: &'static str,
    },

    /// The closure kept reaching for rows outside its lock set.
    #[error("lock set still growing after {attempts} attempts")]
    LockSetUnstable {
        /// Attempts made.
        attempts: u32,
    },

    /// Checked arithmetic overflowed.
    #[error("arithmetic overflow in ledger operation")]
    ArithmeticOverflow,
}

impl LedgerError {
    /// Rejection classification for the command layer.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientFunds { .. } | Self::InsufficientTreasury { .. } => {
                ErrorKind::InsufficientFunds
            }
            Self::InsufficientQuantity { .. } | Self::InsufficientTools { .. } => {
                ErrorKind::InsufficientQuantity
            }
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::RowMissing { .. } => ErrorKind::NotFound,
            Self::NotLocked { .. }
            | Self::UnheldAsset { .. }
            | Self::RowTypeMismatch { .. }
            | Self::LockSetUnstable { .. }
            | Self::ArithmeticOverflow => ErrorKind::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Anomaly type
// ---------------------------------------------------------------------------

/// A journal inconsistency found by [`conservation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAnomaly {
    /// Net imbalance per asset that did not sum to zero.
    pub imbalances: BTreeMap<Asset, i128>,
    /// Entries with a zero amount or identical endpoints.
    pub malformed: usize,
    /// Human-readable description of the anomaly.
    pub message: String,
}

impl core::fmt::Display for LedgerAnomaly {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message)
    }
}
