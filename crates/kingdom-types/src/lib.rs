//! Shared type definitions for the Kingdom simulation.
//!
//! This crate is the single source of truth for the records the simulation
//! core stores and returns. Types flow to `TypeScript` via `ts-rs` for the
//! map viewer and command client.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all entity identifiers
//! - [`enums`] -- Resources (with the fruit/food alias table), tools, biomes,
//!   job kinds, journal accounts, and rejection kinds
//! - [`structs`] -- Cells, settlements, player accounts, jobs, stakes,
//!   journal entries, and operation receipts

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    Account, Asset, Biome, ClaimStatus, EntryKind, ErrorKind, Item, JobKind, Resource, Tool,
};
pub use ids::{ClaimId, JobId, LedgerEntryId, PlayerId, SettlementId};
pub use structs::{
    ActiveClaim, BuildingBuffs, Coord, GameDay, GridSnapshot, Job, JobClaim, LedgerEntry,
    MarketMakerBoard, MarketMakerStake, Notice, PlayerAccount, PurchaseReceipt, SaleReceipt,
    Settlement, SettlementMarker, StakeReceipt, StakeStatus, StockLine, WorldCell, WorldMeta,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Files land in `bindings/` relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::PlayerId::export_all();
        let _ = crate::ids::SettlementId::export_all();
        let _ = crate::ids::JobId::export_all();
        let _ = crate::ids::ClaimId::export_all();
        let _ = crate::ids::LedgerEntryId::export_all();

        // Enums
        let _ = crate::enums::Resource::export_all();
        let _ = crate::enums::Tool::export_all();
        let _ = crate::enums::Item::export_all();
        let _ = crate::enums::Biome::export_all();
        let _ = crate::enums::JobKind::export_all();
        let _ = crate::enums::ClaimStatus::export_all();
        let _ = crate::enums::Asset::export_all();
        let _ = crate::enums::Account::export_all();
        let _ = crate::enums::EntryKind::export_all();
        let _ = crate::enums::ErrorKind::export_all();

        // Structs
        let _ = crate::structs::GridSnapshot::export_all();
        let _ = crate::structs::Settlement::export_all();
        let _ = crate::structs::PlayerAccount::export_all();
        let _ = crate::structs::BuildingBuffs::export_all();
        let _ = crate::structs::ActiveClaim::export_all();
        let _ = crate::structs::MarketMakerStake::export_all();
        let _ = crate::structs::MarketMakerBoard::export_all();
        let _ = crate::structs::LedgerEntry::export_all();
        let _ = crate::structs::SaleReceipt::export_all();
        let _ = crate::structs::PurchaseReceipt::export_all();
        let _ = crate::structs::StockLine::export_all();
        let _ = crate::structs::StakeReceipt::export_all();
        let _ = crate::structs::Notice::export_all();
    }
}
