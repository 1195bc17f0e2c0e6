//! Error types for the `kingdom-economy` crate.
//!
//! Every operation returns [`EconomyError`]. Ledger and registry failures
//! are wrapped with `#[from]`, so a shortfall detected deep inside a
//! transaction still reaches the caller with its rejection kind intact.

use kingdom_ledger::LedgerError;
use kingdom_types::{ErrorKind, GameDay, JobId, PlayerId, Resource, SettlementId};
use kingdom_world::WorldError;

/// Errors that can occur during economy operations.
#[derive(Debug, thiserror::Error)]
pub enum EconomyError {
    /// The player has no account.
    #[error("player not found: {0}")]
    UnknownPlayer(PlayerId),

    /// The settlement does not exist.
    #[error("settlement not found: {0}")]
    UnknownSettlement(SettlementId),

    /// A quantity or amount of zero was requested.
    #[error("quantity must be at least 1")]
    ZeroQuantity,

    /// A transfer named the acting player as the other party.
    #[error("cannot target yourself")]
    SelfTarget,

    /// The other party is in a different settlement.
    #[error("{other} is not in your settlement")]
    NotTogether {
        /// The other player.
        other: PlayerId,
    },

    /// The player is not where the action must happen.
    #[error("this must be done in {expected}")]
    WrongSettlement {
        /// Where the player needs to be.
        expected: SettlementId,
    },

    /// The player does not own the settlement.
    #[error("{player} does not own {settlement}")]
    NotOwner {
        /// The acting player.
        player: PlayerId,
        /// The settlement.
        settlement: SettlementId,
    },

    /// A floor price above the market price.
    #[error("floor {floor} for {resource} exceeds the market price {price}")]
    FloorAboveMarket {
        /// The resource.
        resource: Resource,
        /// Requested floor.
        floor: u64,
        /// Current market price.
        price: u64,
    },

    /// A daily quota outside the allowed range.
    #[error("daily quota {amount} is above the limit of {max}")]
    QuotaOutOfRange {
        /// Requested quota.
        amount: u64,
        /// Largest allowed quota.
        max: u64,
    },

    /// A tax rate above 100 percent.
    #[error("tax rate {percent}% is above 100%")]
    TaxOutOfRange {
        /// Requested rate.
        percent: u8,
    },

    /// Too few units to open a market-maker stake.
    #[error("need {needed} {resource} to make this market, have {available}")]
    BelowStakeThreshold {
        /// The resource.
        resource: Resource,
        /// Units required.
        needed: u64,
        /// Units held.
        available: u64,
    },

    /// Someone already holds the stake for this resource today.
    #[error("the {resource} market already has a maker for {day}")]
    StakeTaken {
        /// The resource.
        resource: Resource,
        /// The game day.
        day: GameDay,
    },

    /// The job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The job has expired.
    #[error("job {0} has expired")]
    JobExpired(JobId),

    /// Another player already holds the job.
    #[error("job {0} is already claimed")]
    JobTaken(JobId),

    /// The player already works on a job.
    #[error("already working on job {job}")]
    ClaimHeld {
        /// The job held.
        job: JobId,
    },

    /// The player holds no job.
    #[error("no active job")]
    NoActiveJob,

    /// The player abandoned a job too recently.
    #[error("wait {remaining_secs}s before taking another job")]
    Cooldown {
        /// Seconds left, rounded up.
        remaining_secs: u64,
    },

    /// Checked arithmetic overflowed.
    #[error("arithmetic overflow: {context}")]
    ArithmeticOverflow {
        /// What was being computed.
        context: String,
    },

    /// A settlement registry operation failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EconomyError {
    /// Overflow error for `context`.
    pub fn overflow(context: &str) -> Self {
        Self::ArithmeticOverflow {
            context: context.to_owned(),
        }
    }

    /// Rejection classification for the command layer.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownPlayer(_)
            | Self::UnknownSettlement(_)
            | Self::JobNotFound(_)
            | Self::NoActiveJob => ErrorKind::NotFound,
            Self::ZeroQuantity
            | Self::SelfTarget
            | Self::NotOwner { .. }
            | Self::FloorAboveMarket { .. }
            | Self::QuotaOutOfRange { .. }
            | Self::TaxOutOfRange { .. } => ErrorKind::InvalidInput,
            Self::NotTogether { .. } | Self::WrongSettlement { .. } => ErrorKind::WrongLocation,
            Self::BelowStakeThreshold { .. } => ErrorKind::InsufficientQuantity,
            Self::StakeTaken { .. } | Self::JobTaken(_) | Self::ClaimHeld { .. } => {
                ErrorKind::AlreadyClaimed
            }
            Self::JobExpired(_) => ErrorKind::Expired,
            Self::Cooldown { .. } => ErrorKind::Cooldown,
            Self::ArithmeticOverflow { .. } => ErrorKind::Internal,
            Self::World(err) => err.kind(),
            Self::Ledger(err) => err.kind(),
        }
    }

    /// Whether this is an expected rejection rather than a fault.
    pub const fn is_rejection(&self) -> bool {
        self.kind().is_rejection()
    }
}
