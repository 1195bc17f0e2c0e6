//! Typed row keys and records held by the [`Ledger`](crate::Ledger).
//!
//! [`RowKey`] derives `Ord`; transactions acquire row locks in that order,
//! which is the stable order that keeps multi-row transactions free of
//! deadlock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kingdom_types::{
    Coord, GameDay, Job, JobClaim, JobId, MarketMakerStake, PlayerAccount, PlayerId, Resource,
    Settlement, SettlementId,
};

/// Address of one lockable row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    /// Index of placed settlement coordinates. Founding locks it so the
    /// separation check and the insert happen atomically.
    Placement,
    /// Lower-cased settlement name, pointing at the settlement id.
    SettlementName(String),
    /// A settlement record.
    Settlement(SettlementId),
    /// A player's balances.
    Player(PlayerId),
    /// A player's active job claim and abandon cooldown.
    ClaimSlot(PlayerId),
    /// A posted job.
    Job(JobId),
    /// The active claim on a job.
    JobClaim(JobId),
    /// Market stock of one resource in one settlement.
    Stock(SettlementId, Resource),
    /// Market-maker stake for one settlement, resource, and day.
    Stake(SettlementId, Resource, GameDay),
    /// The settlement a player has a home in.
    Home(PlayerId),
}

impl RowKey {
    /// Key for a settlement name, normalized for case-insensitive lookup.
    pub fn settlement_name(name: &str) -> Self {
        Self::SettlementName(name.trim().to_lowercase())
    }
}

impl core::fmt::Display for RowKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Placement => write!(f, "placement"),
            Self::SettlementName(name) => write!(f, "settlement-name:{name}"),
            Self::Settlement(id) => write!(f, "settlement:{id}"),
            Self::Player(id) => write!(f, "player:{id}"),
            Self::ClaimSlot(id) => write!(f, "claim-slot:{id}"),
            Self::Job(id) => write!(f, "job:{id}"),
            Self::JobClaim(id) => write!(f, "job-claim:{id}"),
            Self::Stock(id, resource) => write!(f, "stock:{id}:{}", resource.storage_key()),
            Self::Stake(id, resource, day) => {
                write!(f, "stake:{id}:{}:{}", resource.storage_key(), day.0)
            }
            Self::Home(id) => write!(f, "home:{id}"),
        }
    }
}

/// Coordinates of every placed settlement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Placed settlements and where they sit.
    pub placed: BTreeMap<SettlementId, Coord>,
}

impl Placement {
    /// Smallest Chebyshev distance from `coord` to any placed settlement.
    pub fn nearest(&self, coord: Coord) -> Option<u32> {
        self.placed.values().map(|c| c.chebyshev(coord)).min()
    }
}

/// A player's job slot: at most one active claim, plus the abandon cooldown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSlot {
    /// The claim currently held.
    pub active: Option<JobClaim>,
    /// Accepting is refused until this instant.
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// A typed record stored under a [`RowKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// See [`RowKey::Placement`].
    Placement(Placement),
    /// See [`RowKey::SettlementName`].
    SettlementName(SettlementId),
    /// See [`RowKey::Settlement`].
    Settlement(Box<Settlement>),
    /// See [`RowKey::Player`].
    Player(PlayerAccount),
    /// See [`RowKey::ClaimSlot`].
    ClaimSlot(ClaimSlot),
    /// See [`RowKey::Job`].
    Job(Job),
    /// See [`RowKey::JobClaim`].
    JobClaim(JobClaim),
    /// See [`RowKey::Stock`].
    Stock(u64),
    /// See [`RowKey::Stake`].
    Stake(MarketMakerStake),
    /// See [`RowKey::Home`].
    Home(SettlementId),
}

impl Row {
    /// Short name of the variant, for error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Placement(_) => "placement",
            Self::SettlementName(_) => "settlement-name",
            Self::Settlement(_) => "settlement",
            Self::Player(_) => "player",
            Self::ClaimSlot(_) => "claim-slot",
            Self::Job(_) => "job",
            Self::JobClaim(_) => "job-claim",
            Self::Stock(_) => "stock",
            Self::Stake(_) => "stake",
            Self::Home(_) => "home",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_keys_sort_first() {
        let s = SettlementId::new();
        let mut keys = [
            RowKey::Stock(s, Resource::Wood),
            RowKey::Player(PlayerId::new()),
            RowKey::Settlement(s),
            RowKey::Placement,
        ];
        keys.sort();
        assert_eq!(keys.first(), Some(&RowKey::Placement));
        assert!(matches!(keys.get(1), Some(RowKey::Settlement(_))));
    }

    #[test]
    fn settlement_name_key_is_case_insensitive() {
        assert_eq!(
            RowKey::settlement_name("  Oakridge "),
            RowKey::settlement_name("oakRIDGE")
        );
    }

    #[test]
    fn nearest_placement() {
        let mut p = Placement::default();
        assert_eq!(p.nearest(Coord::new(0, 0)), None);
        p.placed.insert(SettlementId::new(), Coord::new(5, 5));
        p.placed.insert(SettlementId::new(), Coord::new(20, 2));
        assert_eq!(p.nearest(Coord::new(7, 6)), Some(2));
    }
}
