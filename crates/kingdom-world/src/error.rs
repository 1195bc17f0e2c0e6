//! Error types for the `kingdom-world` crate.
//!
//! Grid generation and settlement registry operations return [`WorldError`].
//! Ledger failures raised inside a registry transaction are wrapped through
//! `#[from]` so the rejection kind survives.

use kingdom_ledger::LedgerError;
use kingdom_types::{Coord, ErrorKind, PlayerId, SettlementId};

/// Errors that can occur during world and settlement operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// A settlement name was not found.
    #[error("settlement not found: {0}")]
    SettlementNotFound(String),

    /// A settlement id was not found.
    #[error("settlement not found: {0}")]
    UnknownSettlement(SettlementId),

    /// A settlement with this name already exists.
    #[error("a settlement named {name} already exists")]
    NameTaken {
        /// The requested name.
        name: String,
    },

    /// The name is reserved for the capital.
    #[error("the name {name} is reserved")]
    ReservedName {
        /// The requested name.
        name: String,
    },

    /// The name is too short once trimmed.
    #[error("settlement names need at least {min} characters")]
    NameTooShort {
        /// Minimum length.
        min: usize,
    },

    /// The coordinate lies outside the grid.
    #[error("{coord} is outside the {width}x{height} grid")]
    OutOfBounds {
        /// The rejected coordinate.
        coord: Coord,
        /// Grid width.
        width: u32,
        /// Grid height.
        height: u32,
    },

    /// The cell cannot host a settlement (ocean or poor living quality).
    #[error("{coord} is not habitable")]
    Uninhabitable {
        /// The rejected coordinate.
        coord: Coord,
    },

    /// The coordinate is too close to an existing settlement.
    #[error("{coord} is within {distance} cells of another settlement (minimum {minimum})")]
    TooClose {
        /// The rejected coordinate.
        coord: Coord,
        /// Distance to the nearest settlement.
        distance: u32,
        /// Required separation.
        minimum: u32,
    },

    /// No cell within the search radius satisfies the placement rules.
    #[error("no suitable location found near {near}")]
    NoSuitableLocation {
        /// Centre of the search.
        near: Coord,
    },

    /// Stored cells do not cover the grid exactly once.
    #[error("stored grid is {width}x{height} but has {cells} usable cells")]
    CorruptGrid {
        /// Grid width.
        width: u32,
        /// Grid height.
        height: u32,
        /// Cells supplied.
        cells: usize,
    },

    /// No world grid has been generated yet.
    #[error("the world has not been generated")]
    NoWorld,

    /// The settlement has reached its population cap.
    #[error("{settlement} is full ({cap} homes)")]
    AtCapacity {
        /// The full settlement.
        settlement: SettlementId,
        /// Its population cap.
        cap: u32,
    },

    /// The settlement is not on the map, so nobody can live there.
    #[error("{settlement} has no place on the map")]
    Unplaced {
        /// The settlement.
        settlement: SettlementId,
    },

    /// The player has no account.
    #[error("player not found: {0}")]
    UnknownPlayer(PlayerId),

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl WorldError {
    /// Rejection classification for the command layer.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SettlementNotFound(_)
            | Self::UnknownSettlement(_)
            | Self::UnknownPlayer(_)
            | Self::NoWorld => ErrorKind::NotFound,
            Self::CorruptGrid { .. } => ErrorKind::Internal,
            Self::NameTaken { .. } => ErrorKind::AlreadyExists,
            Self::ReservedName { .. } => ErrorKind::Reserved,
            Self::NameTooShort { .. } | Self::Unplaced { .. } => ErrorKind::InvalidInput,
            Self::OutOfBounds { .. } | Self::Uninhabitable { .. } => ErrorKind::OutOfBounds,
            Self::TooClose { .. } => ErrorKind::TooClose,
            Self::NoSuitableLocation { .. } => ErrorKind::NoSuitableLocation,
            Self::AtCapacity { .. } => ErrorKind::CapacityExceeded,
            Self::Ledger(err) => err.kind(),
        }
    }

    /// Whether this is an expected rejection rather than a fault.
    pub const fn is_rejection(&self) -> bool {
        self.kind().is_rejection()
    }
}
