//! Core entity structs for the Kingdom simulation.
//!
//! These are the typed records held by the transactional ledger and returned
//! by the simulation facade. Quantities and gold are whole units (`u64`);
//! elevation is the only floating-point value and never feeds back into
//! balances.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::enums::{Account, Asset, Biome, ClaimStatus, EntryKind, JobKind, Resource, Tool};
use crate::ids::{ClaimId, JobId, LedgerEntryId, PlayerId, SettlementId};

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

/// A cell position on the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Coord {
    /// Column, 0-based.
    pub x: u32,
    /// Row, 0-based.
    pub y: u32,
}

impl Coord {
    /// Create a coordinate.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Chebyshev (king-move) distance to another coordinate.
    pub const fn chebyshev(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        if dx > dy { dx } else { dy }
    }
}

impl core::fmt::Display for Coord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A game day: a fixed wall-clock interval numbered from the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GameDay(pub u64);

impl core::fmt::Display for GameDay {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "day {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// One immutable terrain cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldCell {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Terrain class.
    pub biome: Biome,
    /// Elevation in `[0, 1]`.
    pub elevation: f64,
    /// Derived living quality (may be negative).
    pub living_quality: i32,
}

impl WorldCell {
    /// Position of the cell.
    pub const fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }
}

/// Metadata describing the generated grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldMeta {
    /// The seed string the grid was generated from.
    pub seed: String,
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Cell chosen for the capital.
    pub capital: Option<Coord>,
    /// When the grid was generated.
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Settlements and players
// ---------------------------------------------------------------------------

/// A named settlement with its market and treasury configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Settlement {
    /// Unique settlement identifier.
    pub id: SettlementId,
    /// Display name; unique case-insensitively.
    pub name: String,
    /// Grid position, if placed on the map.
    pub coord: Option<Coord>,
    /// Whether this is the capital.
    pub is_capital: bool,
    /// Living quality before building bonuses.
    pub base_living_quality: i32,
    /// Current living quality.
    pub living_quality: i32,
    /// Number of buildings recorded here.
    pub building_count: u32,
    /// Maximum number of homes.
    pub pop_cap: u32,
    /// Homes currently registered here.
    pub residents: u32,
    /// Market tax percentage, `0..=100`.
    pub tax_rate: u8,
    /// Gold held by the treasury.
    pub treasury: u64,
    /// Trades with a gross at or below this value are untaxed.
    pub tax_free_up_to: u64,
    /// Market price per resource unit.
    pub prices: BTreeMap<Resource, u64>,
    /// Base price per tool.
    pub tool_prices: BTreeMap<Tool, u64>,
    /// Treasury floor price per resource (0 = no floor).
    pub floors: BTreeMap<Resource, u64>,
    /// Configured daily treasury quota per resource.
    pub daily_quotas: BTreeMap<Resource, u64>,
    /// Remaining treasury quota for the current game day.
    pub quotas: BTreeMap<Resource, u64>,
    /// Owner who may manage the treasury.
    pub owner: Option<PlayerId>,
    /// When the settlement was created.
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    /// Market price of a resource (0 when unpriced).
    pub fn price(&self, resource: Resource) -> u64 {
        self.prices.get(&resource).copied().unwrap_or(0)
    }

    /// Base price of a tool, falling back to the tool default.
    pub fn tool_price(&self, tool: Tool) -> u64 {
        self.tool_prices
            .get(&tool)
            .copied()
            .unwrap_or_else(|| tool.default_price())
    }

    /// Treasury floor price of a resource (0 when unset).
    pub fn floor(&self, resource: Resource) -> u64 {
        self.floors.get(&resource).copied().unwrap_or(0)
    }

    /// Remaining treasury quota of a resource for today.
    pub fn quota_remaining(&self, resource: Resource) -> u64 {
        self.quotas.get(&resource).copied().unwrap_or(0)
    }

    /// Whether the settlement has grid coordinates.
    pub const fn is_placed(&self) -> bool {
        self.coord.is_some()
    }
}

/// Balances the simulation tracks for a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PlayerAccount {
    /// Player identifier from the session layer.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Settlement the player is currently in.
    pub settlement: SettlementId,
    /// Gold on hand.
    pub gold: u64,
    /// Resources carried.
    pub inventory: BTreeMap<Resource, u64>,
    /// Tools owned.
    pub tools: BTreeMap<Tool, u64>,
}

impl PlayerAccount {
    /// Open an empty account in a settlement.
    pub fn new(id: PlayerId, name: String, settlement: SettlementId) -> Self {
        Self {
            id,
            name,
            settlement,
            gold: 0,
            inventory: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }

    /// Units of a resource the player carries.
    pub fn holding(&self, resource: Resource) -> u64 {
        self.inventory.get(&resource).copied().unwrap_or(0)
    }

    /// Number of a tool the player owns.
    pub fn tool_count(&self, tool: Tool) -> u64 {
        self.tools.get(&tool).copied().unwrap_or(0)
    }
}

/// Buffs a settlement receives from its buildings.
///
/// Computed by the building catalog outside the simulation core and
/// consumed read-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BuildingBuffs {
    /// Extra storage slots.
    pub storage_bonus: u64,
    /// Tool discount in percent. Clamped by the market.
    pub tool_discount_percent: u32,
    /// Raises the tax-free threshold to at least this gross.
    pub tax_free_up_to: u64,
    /// Flat living-quality bonus.
    pub living_quality_bonus: i32,
    /// Guard strength; unused by the economy.
    pub guard_bonus: u32,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A posted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Settlement the job was posted in.
    pub settlement: SettlementId,
    /// What the job asks for.
    pub kind: JobKind,
    /// Resource to deliver (delivery jobs only).
    pub resource: Option<Resource>,
    /// Units to deliver (0 for couriers).
    pub quantity: u64,
    /// Courier destination.
    pub destination: Option<SettlementId>,
    /// Gold paid on completion.
    pub reward: u64,
    /// When the job was posted.
    pub posted_at: DateTime<Utc>,
    /// When the job stops being claimable or deliverable.
    pub expires_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A player's claim on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct JobClaim {
    /// Unique claim identifier.
    pub id: ClaimId,
    /// Claimed job.
    pub job: JobId,
    /// Claimant.
    pub player: PlayerId,
    /// Lifecycle state.
    pub status: ClaimStatus,
    /// When the claim was made.
    pub claimed_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// A claim together with the job it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActiveClaim {
    /// The claim.
    pub claim: JobClaim,
    /// The claimed job.
    pub job: Job,
}

// ---------------------------------------------------------------------------
// Market making
// ---------------------------------------------------------------------------

/// A market-maker stake on one resource of one settlement for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MarketMakerStake {
    /// Settlement.
    pub settlement: SettlementId,
    /// Resource the stake covers.
    pub resource: Resource,
    /// Game day the stake is valid for.
    pub day: GameDay,
    /// Player receiving commission.
    pub holder: PlayerId,
    /// Commission percentage.
    pub percent: u8,
    /// Units surrendered to open the stake.
    pub staked: u64,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// A double-entry record of one balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LedgerEntry {
    /// Unique entry identifier.
    pub id: LedgerEntryId,
    /// What moved.
    pub asset: Asset,
    /// Debited account.
    pub from: Account,
    /// Credited account.
    pub to: Account,
    /// Units moved (always positive).
    pub amount: u64,
    /// Why it moved.
    pub kind: EntryKind,
    /// Related entity such as a job id.
    pub reference_id: Option<Uuid>,
    /// Wall-clock time the transaction committed.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

/// Outcome of a sale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SaleReceipt {
    /// Units bought by the treasury at the floor price.
    pub treasury_qty: u64,
    /// Gold the treasury paid.
    pub treasury_paid: u64,
    /// Units sold to the market.
    pub market_qty: u64,
    /// Market gross before tax.
    pub market_gross: u64,
    /// Gold the seller received from the market.
    pub market_net: u64,
    /// Commission paid to the market maker, if any.
    pub commission: u64,
}

impl SaleReceipt {
    /// Total gold credited to the seller.
    pub const fn total_paid(&self) -> u64 {
        self.treasury_paid.saturating_add(self.market_net)
    }
}

/// Outcome of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PurchaseReceipt {
    /// Gold paid including tax.
    pub cost: u64,
    /// Market stock after the purchase (resources only).
    pub new_stock: Option<u64>,
}

/// One line of a market stock listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StockLine {
    /// Resource.
    pub resource: Resource,
    /// Units in stock.
    pub quantity: u64,
}

/// Outcome of opening a market-maker stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StakeReceipt {
    /// Units surrendered.
    pub staked: u64,
    /// Commission percentage granted.
    pub percent: u8,
}

/// One active stake in a status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StakeStatus {
    /// Resource.
    pub resource: Resource,
    /// Holder id.
    pub holder: PlayerId,
    /// Holder display name, when known.
    pub holder_name: Option<String>,
    /// Commission percentage.
    pub percent: u8,
}

/// Market-maker status of a settlement for the current day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MarketMakerBoard {
    /// Current game day.
    pub day: GameDay,
    /// Milliseconds until the next day starts.
    pub remaining_ms: u64,
    /// Active stakes, ordered by resource.
    pub stakes: Vec<StakeStatus>,
}

/// A settlement as drawn on the world map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SettlementMarker {
    /// Settlement id.
    pub id: SettlementId,
    /// Name.
    pub name: String,
    /// Position.
    pub coord: Coord,
    /// Whether it is the capital.
    pub is_capital: bool,
    /// Owner, if any.
    pub owner: Option<PlayerId>,
    /// Registered homes.
    pub residents: u32,
}

/// Full map payload: metadata, every cell, and placed settlements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GridSnapshot {
    /// Grid metadata.
    pub meta: WorldMeta,
    /// Every cell in row-major order.
    pub cells: Vec<WorldCell>,
    /// Settlements with coordinates, capital first.
    pub settlements: Vec<SettlementMarker>,
}

/// A fire-and-forget message for connected players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Notice {
    /// Settlement audience, or `None` for everyone.
    pub settlement: Option<SettlementId>,
    /// Message text.
    pub message: String,
}

impl Notice {
    /// A notice for players in one settlement.
    pub fn local(settlement: SettlementId, message: impl Into<String>) -> Self {
        Self {
            settlement: Some(settlement),
            message: message.into(),
        }
    }

    /// A notice for every connected player.
    pub fn global(message: impl Into<String>) -> Self {
        Self {
            settlement: None,
            message: message.into(),
        }
    }
}
