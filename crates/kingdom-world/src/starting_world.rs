//! Bootstrapping the world: grid generation plus capital placement.
//!
//! The capital is the one settlement that always has coordinates. It is
//! created on first generation at the grid's [`capital_site`], and a forced
//! regeneration only moves it if it somehow lacks coordinates.
//!
//! [`capital_site`]: crate::world_map::WorldGrid::capital_site

use chrono::{DateTime, Utc};
use tracing::info;

use kingdom_ledger::RowKey;
use kingdom_types::{Account, EntryKind, Settlement, SettlementId, WorldMeta};

use crate::error::WorldError;
use crate::settlement::{CAPITAL_NAME, SettlementRegistry};
use crate::world_map::{World, WorldGenConfig, WorldGrid};

/// Generate the world if needed and make sure the capital is placed.
///
/// With `force` false and a grid already present this changes nothing and
/// returns the current metadata. Otherwise the new grid is built aside and
/// installed only after the capital commits, so a failure leaves the prior
/// grid and settlements untouched.
pub async fn generate_world(
    registry: &SettlementRegistry,
    config: &WorldGenConfig,
    force: bool,
    now: DateTime<Utc>,
) -> Result<WorldMeta, WorldError> {
    let world = registry.world();
    let _generating = world.begin_generation().await;
    if let Some(meta) = world.meta().await.filter(|_| !force) {
        return Ok(meta);
    }
    let mut grid = World::build(config, now);
    let capital = place_capital(registry, &grid, config.capital_candidates).await?;
    grid.set_capital(capital.coord);
    let installed = world.install(grid).await;
    info!(forced = force, capital = ?capital.coord, "World installed");
    Ok(installed.meta().clone())
}

/// Create the capital, or give it coordinates if it has none.
///
/// A capital that is already placed is returned untouched, even when
/// `grid` has no suitable site.
pub async fn place_capital(
    registry: &SettlementRegistry,
    grid: &WorldGrid,
    candidates: usize,
) -> Result<Settlement, WorldError> {
    let site = grid.capital_site(candidates);
    let center = grid.center();
    let cell_lq = site
        .and_then(|site| grid.cell(site))
        .map_or(0, |c| c.living_quality.max(0));
    let rules = registry.rules();
    let id = SettlementId::new();
    let now = Utc::now();

    let capital = registry
        .ledger()
        .transact(
            [
                RowKey::Placement,
                RowKey::settlement_name(CAPITAL_NAME),
                RowKey::Settlement(id),
            ],
            |tx| {
                if let Some(existing) = tx.find_settlement_name(CAPITAL_NAME)? {
                    let current = tx.settlement(existing)?.clone();
                    if current.coord.is_some() {
                        return Ok(current);
                    }
                    let site = site.ok_or(WorldError::NoSuitableLocation { near: center })?;
                    let capital = tx.settlement_mut(existing)?;
                    capital.coord = Some(site);
                    capital.is_capital = true;
                    capital.pop_cap = rules.capital_pop_cap;
                    let placed = capital.clone();
                    tx.placement_mut()?.placed.insert(existing, site);
                    return Ok(placed);
                }

                let site = site.ok_or(WorldError::NoSuitableLocation { near: center })?;
                let mut capital = rules.blank(id, CAPITAL_NAME, now);
                capital.coord = Some(site);
                capital.is_capital = true;
                capital.base_living_quality = cell_lq;
                capital.living_quality = cell_lq;
                capital.tax_rate = rules.capital_tax_rate;
                capital.pop_cap = rules.capital_pop_cap;
                tx.insert_settlement(capital.clone())?;
                tx.placement_mut()?.placed.insert(id, site);
                tx.credit_treasury(id, rules.starting_treasury, Account::World, EntryKind::Grant)?;
                Ok::<_, WorldError>(capital)
            },
        )
        .await?;

    info!(
        x = capital.coord.map(|c| c.x),
        y = capital.coord.map(|c| c.y),
        "Capital placed"
    );
    Ok(capital)
}
