//! Error type of the simulation facade.
//!
//! [`CoreError`] is what every [`Simulation`](crate::simulation::Simulation)
//! operation returns. It only wraps the crate errors below it, so the
//! rejection kind the command layer phrases its reply from is always the
//! one the failing crate chose.

use kingdom_economy::EconomyError;
use kingdom_ledger::LedgerError;
use kingdom_types::{ErrorKind, PlayerId};
use kingdom_world::WorldError;

use crate::clock::ClockError;

/// Errors returned by the simulation facade.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A world or settlement operation failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// A market, job, treasury, or transfer operation failed.
    #[error(transparent)]
    Economy(#[from] EconomyError),

    /// A ledger operation outside the other services failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The clock could not produce an instant.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// The player has no account.
    #[error("player not found: {0}")]
    UnknownPlayer(PlayerId),

    /// The journal does not balance.
    #[error("{0}")]
    Unbalanced(String),
}

impl CoreError {
    /// Rejection classification for the command layer.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::World(err) => err.kind(),
            Self::Economy(err) => err.kind(),
            Self::Ledger(err) => err.kind(),
            Self::UnknownPlayer(_) => ErrorKind::NotFound,
            Self::Clock(_) | Self::Unbalanced(_) => ErrorKind::Internal,
        }
    }

    /// Whether this is an expected rejection rather than a fault.
    pub const fn is_rejection(&self) -> bool {
        self.kind().is_rejection()
    }
}
