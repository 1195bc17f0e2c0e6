//! Read-only access to building buffs.
//!
//! The building catalog lives outside the simulation core. The market only
//! needs the aggregated effect per settlement, so it asks a [`BuffProvider`]
//! from inside its transactions. Providers must answer synchronously and
//! without touching the ledger.

use std::collections::BTreeMap;

use kingdom_types::{BuildingBuffs, SettlementId};

/// Source of aggregated building buffs per settlement.
pub trait BuffProvider: Send + Sync {
    /// The buffs currently active in `settlement`.
    fn buffs(&self, settlement: SettlementId) -> BuildingBuffs;
}

/// A provider for a world with no buildings.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBuffs;

impl BuffProvider for NoBuffs {
    fn buffs(&self, _settlement: SettlementId) -> BuildingBuffs {
        BuildingBuffs::default()
    }
}

/// A fixed buff table, for tests and static worlds.
#[derive(Debug, Clone, Default)]
pub struct StaticBuffs {
    table: BTreeMap<SettlementId, BuildingBuffs>,
}

impl StaticBuffs {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffs of one settlement.
    #[must_use]
    pub fn with(mut self, settlement: SettlementId, buffs: BuildingBuffs) -> Self {
        self.table.insert(settlement, buffs);
        self
    }
}

impl BuffProvider for StaticBuffs {
    fn buffs(&self, settlement: SettlementId) -> BuildingBuffs {
        self.table.get(&settlement).copied().unwrap_or_default()
    }
}
