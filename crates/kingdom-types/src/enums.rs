//! Enumeration types for the Kingdom simulation.
//!
//! Resources carry a two-way alias table: players type and read `fruit`,
//! while balances and persisted rows use the storage key `food`. Every
//! conversion between the two goes through [`Resource`] so the mapping lives
//! in exactly one place.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{PlayerId, SettlementId};

// ---------------------------------------------------------------------------
// Resources and tools
// ---------------------------------------------------------------------------

/// A sellable raw resource traded on settlement markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Foraged fruit. Stored under the key `food`.
    Fruit,
    /// Meat from hunting.
    Meat,
    /// Lumber.
    Wood,
    /// Quarried stone.
    Stone,
}

/// Alias table: (resource, display name, storage key).
const RESOURCE_ALIASES: [(Resource, &str, &str); 4] = [
    (Resource::Fruit, "fruit", "food"),
    (Resource::Meat, "meat", "meat"),
    (Resource::Wood, "wood", "wood"),
    (Resource::Stone, "stone", "stone"),
];

impl Resource {
    /// Every sellable resource, in display order.
    pub const ALL: [Self; 4] = [Self::Fruit, Self::Meat, Self::Wood, Self::Stone];

    /// Name shown to players.
    pub fn display_name(self) -> &'static str {
        RESOURCE_ALIASES
            .iter()
            .find(|(r, _, _)| *r == self)
            .map_or("unknown", |(_, display, _)| display)
    }

    /// Key used for balances and persisted rows.
    pub fn storage_key(self) -> &'static str {
        RESOURCE_ALIASES
            .iter()
            .find(|(r, _, _)| *r == self)
            .map_or("unknown", |(_, _, key)| key)
    }

    /// Parse player input or a storage key, case-insensitively.
    ///
    /// Both `fruit` and `food` resolve to [`Resource::Fruit`].
    pub fn parse(input: &str) -> Option<Self> {
        let needle = input.trim().to_ascii_lowercase();
        RESOURCE_ALIASES
            .iter()
            .find(|(_, display, key)| *display == needle || *key == needle)
            .map(|(r, _, _)| *r)
    }

    /// Resolve a storage key (as written by [`Resource::storage_key`]).
    pub fn from_storage_key(key: &str) -> Option<Self> {
        RESOURCE_ALIASES
            .iter()
            .find(|(_, _, k)| *k == key)
            .map(|(r, _, _)| *r)
    }
}

impl core::fmt::Display for Resource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A tool sold by settlement markets. Tools have no stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Hunting bow.
    Bow,
    /// Mining pickaxe.
    Pickaxe,
}

impl Tool {
    /// Every tool.
    pub const ALL: [Self; 2] = [Self::Bow, Self::Pickaxe];

    /// Lower-case name used in commands and storage.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bow => "bow",
            Self::Pickaxe => "pickaxe",
        }
    }

    /// Base price when a settlement has no explicit price for the tool.
    pub const fn default_price(self) -> u64 {
        match self {
            Self::Bow => 20,
            Self::Pickaxe => 25,
        }
    }

    /// Parse a tool name, case-insensitively.
    pub fn parse(input: &str) -> Option<Self> {
        let needle = input.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.name() == needle)
    }
}

impl core::fmt::Display for Tool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything a player can buy from a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Item {
    /// A stocked raw resource.
    Resource(Resource),
    /// An unstocked tool.
    Tool(Tool),
}

impl Item {
    /// Parse a resource or tool name.
    pub fn parse(input: &str) -> Option<Self> {
        Resource::parse(input)
            .map(Self::Resource)
            .or_else(|| Tool::parse(input).map(Self::Tool))
    }
}

// ---------------------------------------------------------------------------
// Terrain
// ---------------------------------------------------------------------------

/// Terrain class of a world cell, derived from elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Biome {
    /// Open water. Cannot host a settlement.
    Ocean,
    /// Shoreline just above sea level.
    Coast,
    /// Low flat land.
    Plains,
    /// Wooded land.
    Forest,
    /// Rolling high ground.
    Hills,
    /// Peaks above the hill line.
    Mountain,
}

impl Biome {
    /// Lower-case name used in persisted rows.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ocean => "ocean",
            Self::Coast => "coast",
            Self::Plains => "plains",
            Self::Forest => "forest",
            Self::Hills => "hills",
            Self::Mountain => "mountain",
        }
    }

    /// Parse a persisted biome name.
    pub fn parse(input: &str) -> Option<Self> {
        [
            Self::Ocean,
            Self::Coast,
            Self::Plains,
            Self::Forest,
            Self::Hills,
            Self::Mountain,
        ]
        .into_iter()
        .find(|b| b.name() == input)
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// The kind of work a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Deliver fruit.
    Forage,
    /// Deliver meat.
    Hunt,
    /// Deliver stone.
    Mine,
    /// Travel to another settlement.
    Courier,
}

impl JobKind {
    /// The resource a delivery job requires, or `None` for couriers.
    pub const fn resource(self) -> Option<Resource> {
        match self {
            Self::Forage => Some(Resource::Fruit),
            Self::Hunt => Some(Resource::Meat),
            Self::Mine => Some(Resource::Stone),
            Self::Courier => None,
        }
    }

    /// Lower-case name used in persisted rows and notices.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Forage => "forage",
            Self::Hunt => "hunt",
            Self::Mine => "mine",
            Self::Courier => "courier",
        }
    }
}

/// Lifecycle state of a job claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// The claimant is working on the job.
    Claimed,
    /// Delivered and paid.
    Completed,
    /// Given up by the claimant.
    Abandoned,
    /// The job expired while claimed.
    Expired,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// What a journal entry moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    /// Gold coins.
    Gold,
    /// A raw resource.
    Resource(Resource),
    /// A tool.
    Tool(Tool),
}

/// One side of a double-entry journal record.
///
/// `Market`, `World`, and `Void` are the explicit counterparties through
/// which value enters or leaves the tracked balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Account {
    /// A player's balance.
    Player(PlayerId),
    /// A settlement treasury.
    Treasury(SettlementId),
    /// A settlement's market inventory.
    Stock(SettlementId),
    /// The market counterparty of a settlement: pays sale proceeds and
    /// commission, receives purchase payments.
    Market(SettlementId),
    /// Source of job rewards and account grants.
    World,
    /// Sink for staked and delivered goods.
    Void,
}

impl Account {
    /// Whether this account is an external counterparty rather than a
    /// tracked balance.
    pub const fn is_external(self) -> bool {
        matches!(self, Self::Market(_) | Self::World | Self::Void)
    }
}

/// Why a journal entry was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Starting balance granted when an account opens.
    Grant,
    /// Goods sold into the treasury at the floor price.
    FloorSale,
    /// Goods sold to the market at the market price.
    MarketSale,
    /// Resources bought from market stock.
    MarketPurchase,
    /// A tool bought from the market.
    ToolPurchase,
    /// Market-maker commission on a trade.
    Commission,
    /// Resources surrendered to open a market-maker stake.
    Stake,
    /// Resources handed in to complete a job.
    JobDelivery,
    /// Gold paid for a completed job.
    JobReward,
    /// Gold sent from one player to another.
    Payment,
    /// Resources given from one player to another.
    Gift,
    /// Gold moved from a player into a treasury.
    TreasuryFund,
    /// Treasury and stock written off when a settlement is dissolved.
    Dissolution,
}

impl EntryKind {
    /// Every kind.
    pub const ALL: [Self; 13] = [
        Self::Grant,
        Self::FloorSale,
        Self::MarketSale,
        Self::MarketPurchase,
        Self::ToolPurchase,
        Self::Commission,
        Self::Stake,
        Self::JobDelivery,
        Self::JobReward,
        Self::Payment,
        Self::Gift,
        Self::TreasuryFund,
        Self::Dissolution,
    ];

    /// Resolve a tag written by [`EntryKind::tag`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Upper-case tag used in persisted rows.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Grant => "GRANT",
            Self::FloorSale => "FLOOR_SALE",
            Self::MarketSale => "MARKET_SALE",
            Self::MarketPurchase => "MARKET_PURCHASE",
            Self::ToolPurchase => "TOOL_PURCHASE",
            Self::Commission => "COMMISSION",
            Self::Stake => "STAKE",
            Self::JobDelivery => "JOB_DELIVERY",
            Self::JobReward => "JOB_REWARD",
            Self::Payment => "PAYMENT",
            Self::Gift => "GIFT",
            Self::TreasuryFund => "TREASURY_FUND",
            Self::Dissolution => "DISSOLUTION",
        }
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Classification of a failed operation, for the command layer to phrase a
/// message. Everything but [`ErrorKind::Internal`] is an expected rejection
/// that rolled back cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Not enough gold.
    InsufficientFunds,
    /// Not enough market stock.
    InsufficientStock,
    /// The player holds too few units of a resource.
    InsufficientQuantity,
    /// A referenced entity does not exist.
    NotFound,
    /// The slot is already taken (job claim, stake, active claim).
    AlreadyClaimed,
    /// A uniquely named entity already exists.
    AlreadyExists,
    /// Coordinates fall outside the grid or on unusable terrain.
    OutOfBounds,
    /// Too close to an existing settlement.
    TooClose,
    /// No cell satisfies the founding constraints.
    NoSuitableLocation,
    /// The job expired.
    Expired,
    /// The settlement has no room for another home.
    CapacityExceeded,
    /// The player must wait before doing this again.
    Cooldown,
    /// The player is in the wrong settlement for this action.
    WrongLocation,
    /// The name is reserved.
    Reserved,
    /// Malformed or out-of-range input.
    InvalidInput,
    /// An unexpected fault. Not a rejection.
    Internal,
}

impl ErrorKind {
    /// Whether the failure was an expected, cleanly rolled back rejection.
    pub const fn is_rejection(self) -> bool {
        !matches!(self, Self::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_tags_resolve() {
        for kind in EntryKind::ALL {
            assert_eq!(EntryKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(EntryKind::from_tag("grant"), None);
    }

    #[test]
    fn fruit_aliases_food() {
        assert_eq!(Resource::parse("fruit"), Some(Resource::Fruit));
        assert_eq!(Resource::parse("FOOD"), Some(Resource::Fruit));
        assert_eq!(Resource::Fruit.storage_key(), "food");
        assert_eq!(Resource::Fruit.display_name(), "fruit");
        assert_eq!(Resource::from_storage_key("food"), Some(Resource::Fruit));
        assert_eq!(Resource::from_storage_key("fruit"), None);
    }

    #[test]
    fn every_resource_has_distinct_keys() {
        for r in Resource::ALL {
            assert_eq!(Resource::from_storage_key(r.storage_key()), Some(r));
            assert_eq!(Resource::parse(r.display_name()), Some(r));
        }
    }

    #[test]
    fn item_parse_prefers_resources_then_tools() {
        assert_eq!(Item::parse("wood"), Some(Item::Resource(Resource::Wood)));
        assert_eq!(Item::parse("Bow"), Some(Item::Tool(Tool::Bow)));
        assert_eq!(Item::parse("sword"), None);
    }

    #[test]
    fn job_kind_resources() {
        assert_eq!(JobKind::Forage.resource(), Some(Resource::Fruit));
        assert_eq!(JobKind::Courier.resource(), None);
    }

    #[test]
    fn only_internal_is_not_a_rejection() {
        assert!(ErrorKind::Cooldown.is_rejection());
        assert!(!ErrorKind::Internal.is_rejection());
    }

    #[test]
    fn biome_round_trips_through_name() {
        assert_eq!(Biome::parse(Biome::Hills.name()), Some(Biome::Hills));
        assert_eq!(Biome::parse("swamp"), None);
    }
}
