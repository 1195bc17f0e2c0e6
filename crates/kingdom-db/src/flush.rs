//! Copy the in-memory hot state into the archive.
//!
//! The ledger is authoritative while the simulation runs. A flush appends
//! the journal entries committed since the previous flush and replaces the
//! settlement snapshots. The journal cursor only advances after the insert
//! committed, so a failed flush is retried in full next time; entries it
//! passes are dropped from memory.

use chrono::{DateTime, Utc};
use kingdom_ledger::Ledger;
use kingdom_world::World;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::DbError;
use crate::journal_store::JournalStore;
use crate::world_store::WorldStore;

/// What one flush wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// New journal rows.
    pub journal: u64,
    /// Settlement snapshots written.
    pub settlements: usize,
}

/// Archive pending journal entries and current settlement snapshots.
pub async fn flush(pool: &PgPool, ledger: &Ledger, now: DateTime<Utc>) -> Result<FlushReport, DbError> {
    let (cursor, pending) = ledger.unpersisted().await;
    let journal = JournalStore::new(pool).append(&pending).await?;
    ledger.mark_persisted(cursor).await;

    let settlements = ledger.settlements().await;
    WorldStore::new(pool)
        .save_settlements(&settlements, now)
        .await?;

    let report = FlushReport {
        journal,
        settlements: settlements.len(),
    };
    debug!(journal, settlements = report.settlements, "Flushed to archive");
    Ok(report)
}

/// Store the current grid unless the archive already holds the same world.
///
/// Worlds are equal when seed, size, and capital match; generation is
/// deterministic, so the cells must match too. Returns whether anything was
/// written.
pub async fn archive_world(pool: &PgPool, world: &World) -> Result<bool, DbError> {
    let Some(grid) = world.grid().await else {
        return Ok(false);
    };
    let store = WorldStore::new(pool);
    let current = grid.meta();
    let same = store.load_meta().await?.is_some_and(|stored| {
        stored.seed == current.seed
            && stored.width == current.width
            && stored.height == current.height
            && stored.capital == current.capital
    });
    if same {
        return Ok(false);
    }
    store.save_grid(&grid).await?;
    info!(seed = %grid.meta().seed, "World archived");
    Ok(true)
}
