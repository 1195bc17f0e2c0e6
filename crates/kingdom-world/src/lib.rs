//! Procedural terrain, capital placement, and the settlement registry for
//! the Kingdom simulation.
//!
//! The grid is a pure function of a seed string. Settlements are ledger rows
//! placed on that grid, so founding and residency changes share the same
//! transactional guarantees as every balance change.
//!
//! # Modules
//!
//! - [`terrain`] -- Seed hash, sfc32 PRNG, fractal noise, and the
//!   elevation-to-biome and living-quality mappings.
//! - [`world_map`] -- [`WorldGrid`], the immutable generated grid, and
//!   [`World`], the shared handle that swaps grids in whole.
//! - [`settlement`] -- [`SettlementRegistry`]: lookup, ensure, founding with
//!   separation rules, homes, living quality, and administrative reset.
//! - [`starting_world`] -- World bootstrap and capital placement.
//! - [`error`] -- Error types for world and registry operations.

pub mod error;
pub mod settlement;
pub mod starting_world;
pub mod terrain;
pub mod world_map;

// Re-export primary types at crate root.
pub use error::WorldError;
pub use settlement::{CAPITAL_NAME, SettlementRegistry, SettlementRules};
pub use starting_world::{generate_world, place_capital};
pub use world_map::{World, WorldGenConfig, WorldGrid};
