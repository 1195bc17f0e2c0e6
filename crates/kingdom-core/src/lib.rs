//! Configuration, clock, background sweeps, and the simulation facade for
//! the Kingdom simulation.
//!
//! This crate is the only one that knows about `kingdom-config.yaml`, the
//! wall clock, and the layers around the core. It wires the world,
//! economy, and ledger crates into a single [`Simulation`] handle.
//!
//! # Modules
//!
//! - [`clock`] -- [`Clock`] with system and manual implementations, and
//!   game-day rollover tracking.
//! - [`config`] -- Configuration loading from `kingdom-config.yaml` into
//!   strongly-typed structs.
//! - [`collaborators`] -- Presence tracking and the broadcast sink.
//! - [`scheduler`] -- Periodic job generation and upkeep tasks.
//! - [`simulation`] -- The [`Simulation`] facade over every operation.
//! - [`error`] -- The facade error type.
//!
//! [`Clock`]: clock::Clock
//! [`Simulation`]: simulation::Simulation

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod simulation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{BroadcastSink, ChannelSink, NullSink, Presence};
pub use config::KingdomConfig;
pub use error::CoreError;
pub use scheduler::Scheduler;
pub use simulation::{Simulation, SimulationBuilder, UpkeepReport};
