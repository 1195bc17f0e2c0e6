//! `PostgreSQL` archive for the Kingdom simulation.
//!
//! The in-memory ledger is the hot state. This crate writes a durable copy:
//! the generated world, the latest settlement snapshots, and the full
//! double-entry journal.
//!
//! ```text
//! Ledger / World (memory)
//!     |
//!     +-- flush() on an interval --> journal, settlements
//!     +-- archive_world() at boot --> world_meta, world_cells
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, settings, and embedded migrations
//! - [`world_store`] -- World grid and settlement snapshots
//! - [`journal_store`] -- Batch journal appends and queries
//! - [`flush`] -- Hot-to-archive copy
//! - [`error`] -- Shared error type

pub mod error;
pub mod flush;
pub mod journal_store;
pub mod postgres;
pub mod world_store;

pub use error::DbError;
pub use flush::{FlushReport, archive_world, flush};
pub use journal_store::{JournalRow, JournalStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use world_store::WorldStore;
