//! The Kingdom economy: markets, market makers, the job board, treasuries,
//! and peer transfers.
//!
//! Every service here is a thin, cloneable handle over the shared
//! [`Ledger`](kingdom_ledger::Ledger). Each operation is one ledger
//! transaction: it locks the rows it reads, re-checks every precondition
//! under those locks, and either commits all of its balance changes or
//! none.
//!
//! # Modules
//!
//! - [`pricing`] -- Tax, tax-free threshold, tool discount, and commission
//!   arithmetic.
//! - [`market`] -- [`Market`]: sell with treasury floor subsidy, buy
//!   resources and tools, stock listing.
//! - [`market_maker`] -- [`MarketMakers`]: daily commission stakes, plus
//!   the [`GameCalendar`] they are keyed by.
//! - [`jobs`] -- [`JobBoard`]: generation, expiry, accept, deliver, abandon.
//! - [`treasury`] -- [`Treasury`]: owner controls and daily quota refill.
//! - [`transfers`] -- [`Accounts`]: account rows, pay, and give.
//! - [`buffs`] -- The read-only [`BuffProvider`] seam for building effects.
//! - [`config`] -- Tunables with the live game's defaults.
//! - [`error`] -- [`EconomyError`].

pub mod buffs;
pub mod config;
pub mod error;
pub mod jobs;
pub mod market;
pub mod market_maker;
pub mod pricing;
pub mod transfers;
pub mod treasury;

// Re-export primary types at crate root.
pub use buffs::{BuffProvider, NoBuffs, StaticBuffs};
pub use config::{JobConfig, MarketConfig, MarketMakerConfig};
pub use error::EconomyError;
pub use jobs::JobBoard;
pub use market::Market;
pub use market_maker::{GameCalendar, MarketMakers, PresenceProvider};
pub use transfers::Accounts;
pub use treasury::Treasury;
