//! Settlement registry: lookup, founding, homes, and living quality.
//!
//! All settlement state lives in ledger rows. Founding locks the global
//! [`RowKey::Placement`] index together with the name row, so the
//! separation check, the name uniqueness check, and the insert are one
//! atomic step even when several players found towns at once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use kingdom_ledger::{Ledger, Placement, Row, RowKey};
use kingdom_types::{
    Account, Biome, BuildingBuffs, Coord, EntryKind, GridSnapshot, JobId, PlayerId, Resource,
    Settlement, SettlementId, SettlementMarker, Tool, WorldCell,
};

use crate::error::WorldError;
use crate::world_map::{World, WorldGrid};

/// Name of the capital. Reserved for founding.
pub const CAPITAL_NAME: &str = "Capital";

/// Placement, naming, capacity, and default economy for settlements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRules {
    /// Minimum Chebyshev distance between placed settlements.
    pub min_distance: u32,
    /// Lowest cell living quality a settlement may be founded on.
    pub min_founding_lq: i32,
    /// Minimum name length in characters, after trimming.
    pub min_name_length: usize,
    /// Growth step of the automatic site search window.
    pub search_radius_step: u32,
    /// Largest search window radius.
    pub search_radius_max: u32,
    /// Population cap of an ordinary settlement at living quality 0.
    pub base_pop_cap: u32,
    /// Fixed population cap of the capital.
    pub capital_pop_cap: u32,
    /// Buildings needed per point of living quality bonus.
    pub lq_building_step: u32,
    /// Upper bound on living quality.
    pub max_living_quality: i32,
    /// Tax rate of a founded town.
    pub founded_tax_rate: u8,
    /// Tax rate of a settlement created on demand.
    pub default_tax_rate: u8,
    /// Tax rate of the capital.
    pub capital_tax_rate: u8,
    /// Stored tax-free threshold (0 leaves it to the market default).
    pub tax_free_up_to: u64,
    /// Treasury granted to a new settlement.
    pub starting_treasury: u64,
    /// Resource prices of a new settlement.
    pub prices: BTreeMap<Resource, u64>,
    /// Tool prices of a new settlement.
    pub tool_prices: BTreeMap<Tool, u64>,
}

impl Default for SettlementRules {
    fn default() -> Self {
        Self {
            min_distance: 3,
            min_founding_lq: 0,
            min_name_length: 3,
            search_radius_step: 8,
            search_radius_max: 80,
            base_pop_cap: 20,
            capital_pop_cap: 200,
            lq_building_step: 3,
            max_living_quality: 100,
            founded_tax_rate: 10,
            default_tax_rate: 12,
            capital_tax_rate: 10,
            tax_free_up_to: 0,
            starting_treasury: 0,
            prices: BTreeMap::from([
                (Resource::Fruit, 1),
                (Resource::Meat, 3),
                (Resource::Wood, 1),
                (Resource::Stone, 2),
            ]),
            tool_prices: Tool::ALL.into_iter().map(|t| (t, t.default_price())).collect(),
        }
    }
}

impl SettlementRules {
    /// A settlement with default economy and no position.
    pub fn blank(&self, id: SettlementId, name: &str, now: DateTime<Utc>) -> Settlement {
        Settlement {
            id,
            name: name.trim().to_owned(),
            coord: None,
            is_capital: false,
            base_living_quality: 0,
            living_quality: 0,
            building_count: 0,
            pop_cap: self.base_pop_cap,
            residents: 0,
            tax_rate: self.default_tax_rate,
            treasury: 0,
            tax_free_up_to: self.tax_free_up_to,
            prices: self.prices.clone(),
            tool_prices: self.tool_prices.clone(),
            floors: BTreeMap::new(),
            daily_quotas: BTreeMap::new(),
            quotas: BTreeMap::new(),
            owner: None,
            created_at: now,
        }
    }

    /// Population cap for a living quality.
    ///
    /// The capital has a fixed cap. Elsewhere each point of positive living
    /// quality adds a tenth of the base cap, rounded down.
    pub fn pop_cap(&self, is_capital: bool, living_quality: i32) -> u32 {
        if is_capital {
            return self.capital_pop_cap;
        }
        if living_quality <= 0 {
            return self.base_pop_cap;
        }
        self.base_pop_cap
            .saturating_mul(10_u32.saturating_add(living_quality.unsigned_abs()))
            / 10
    }

    /// Living quality after buildings and buffs, capped at the maximum.
    pub fn living_quality(&self, base: i32, buildings: u32, buff_bonus: i32) -> i32 {
        let from_buildings = buildings.checked_div(self.lq_building_step).unwrap_or(0);
        base.saturating_add(i32::try_from(from_buildings).unwrap_or(i32::MAX))
            .saturating_add(buff_bonus)
            .min(self.max_living_quality)
    }
}

// ---------------------------------------------------------------------------
// Site selection
// ---------------------------------------------------------------------------

/// Validate an explicit founding site, returning the cell's living quality.
pub fn check_site(
    grid: &WorldGrid,
    placement: &Placement,
    coord: Coord,
    rules: &SettlementRules,
) -> Result<i32, WorldError> {
    let meta = grid.meta();
    let cell = grid.cell(coord).ok_or(WorldError::OutOfBounds {
        coord,
        width: meta.width,
        height: meta.height,
    })?;
    if cell.biome == Biome::Ocean || cell.living_quality < rules.min_founding_lq {
        return Err(WorldError::Uninhabitable { coord });
    }
    match placement.nearest(coord) {
        Some(distance) if distance < rules.min_distance => Err(WorldError::TooClose {
            coord,
            distance,
            minimum: rules.min_distance,
        }),
        _ => Ok(cell.living_quality),
    }
}

/// Search growing square windows around `origin` for the best habitable
/// cell far enough from every placed settlement.
///
/// Cells too close to a settlement are dropped before ranking, so a crowded
/// neighbourhood cannot hide a free cell further down the list.
pub fn search_site(
    grid: &WorldGrid,
    placement: &Placement,
    origin: Coord,
    rules: &SettlementRules,
) -> Option<(Coord, i32)> {
    let step = usize::try_from(rules.search_radius_step.max(1)).ok()?;
    let eligible = |c: &WorldCell| {
        c.biome != Biome::Ocean
            && c.living_quality >= rules.min_founding_lq
            && placement
                .nearest(c.coord())
                .is_none_or(|d| d >= rules.min_distance)
    };
    (rules.search_radius_step.max(1)..=rules.search_radius_max)
        .step_by(step)
        .find_map(|radius| {
            grid.window(origin, radius, eligible, 1)
                .first()
                .map(|c| (c.coord(), c.living_quality))
        })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Named settlements on the map.
#[derive(Debug, Clone)]
pub struct SettlementRegistry {
    ledger: Arc<Ledger>,
    world: Arc<World>,
    rules: SettlementRules,
}

impl SettlementRegistry {
    /// Create a registry over a ledger and world.
    pub const fn new(ledger: Arc<Ledger>, world: Arc<World>, rules: SettlementRules) -> Self {
        Self {
            ledger,
            world,
            rules,
        }
    }

    /// The registry's rules.
    pub const fn rules(&self) -> &SettlementRules {
        &self.rules
    }

    /// The ledger the registry writes through.
    pub const fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The world the registry places settlements on.
    pub const fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Look up a settlement by name, case-insensitively.
    pub async fn find(&self, name: &str) -> Option<Settlement> {
        let id = self.ledger.settlement_by_name(name).await?;
        self.ledger.settlement(id).await
    }

    /// Look up a settlement by id.
    pub async fn get(&self, id: SettlementId) -> Option<Settlement> {
        self.ledger.settlement(id).await
    }

    /// The capital, if bootstrapped.
    pub async fn capital(&self) -> Option<Settlement> {
        self.find(CAPITAL_NAME).await
    }

    /// Every settlement.
    pub async fn list(&self) -> Vec<Settlement> {
        self.ledger.settlements().await
    }

    /// Return the named settlement, creating an unplaced one with default
    /// economy if none exists.
    pub async fn ensure(&self, name: &str) -> Result<Settlement, WorldError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorldError::NameTooShort { min: 1 });
        }
        if let Some(existing) = self.find(name).await {
            return Ok(existing);
        }

        let id = SettlementId::new();
        let now = Utc::now();
        let rules = &self.rules;
        let settlement = self
            .ledger
            .transact(
                [RowKey::settlement_name(name), RowKey::Settlement(id)],
                |tx| {
                    if let Some(existing) = tx.find_settlement_name(name)? {
                        return Ok(tx.settlement(existing)?.clone());
                    }
                    let settlement = rules.blank(id, name, now);
                    tx.insert_settlement(settlement.clone())?;
                    tx.credit_treasury(id, rules.starting_treasury, Account::World, EntryKind::Grant)?;
                    Ok::<_, WorldError>(settlement)
                },
            )
            .await?;
        debug!(settlement = %settlement.name, "Settlement ensured");
        Ok(settlement)
    }

    /// Found a new town owned by `founder`.
    ///
    /// With `coord`, that exact cell is validated. Without it, the best cell
    /// near the founder's settlement (or the capital) is chosen. The founder,
    /// if they have an account, moves into the new town.
    pub async fn found(
        &self,
        founder: Option<PlayerId>,
        name: &str,
        coord: Option<Coord>,
    ) -> Result<Settlement, WorldError> {
        let name = self.validate_name(name)?;
        let grid = self.world.grid().await.ok_or(WorldError::NoWorld)?;
        let origin = self.search_origin(founder, &grid).await;

        let id = SettlementId::new();
        let now = Utc::now();
        let rules = &self.rules;
        let mut keys = vec![
            RowKey::Placement,
            RowKey::settlement_name(&name),
            RowKey::Settlement(id),
        ];
        keys.extend(founder.map(RowKey::Player));

        let settlement = self
            .ledger
            .transact(keys, |tx| {
                if tx.find_settlement_name(&name)?.is_some() {
                    return Err(WorldError::NameTaken { name: name.clone() });
                }
                let placement = tx.find_placement()?.cloned().unwrap_or_default();
                let (site, cell_lq) = match coord {
                    Some(c) => (c, check_site(&grid, &placement, c, rules)?),
                    None => search_site(&grid, &placement, origin, rules)
                        .ok_or(WorldError::NoSuitableLocation { near: origin })?,
                };

                let lq = cell_lq.max(0);
                let mut settlement = rules.blank(id, &name, now);
                settlement.coord = Some(site);
                settlement.base_living_quality = lq;
                settlement.living_quality = lq;
                settlement.tax_rate = rules.founded_tax_rate;
                settlement.owner = founder;
                settlement.pop_cap = rules.pop_cap(false, lq);

                tx.insert_settlement(settlement.clone())?;
                tx.placement_mut()?.placed.insert(id, site);
                tx.credit_treasury(id, rules.starting_treasury, Account::World, EntryKind::Grant)?;
                if let Some(player) = founder {
                    if tx.find_player(player)?.is_some() {
                        tx.player_mut(player)?.settlement = id;
                    }
                }
                Ok(settlement)
            })
            .await?;

        info!(
            settlement = %settlement.name,
            x = settlement.coord.map_or(0, |c| c.x),
            y = settlement.coord.map_or(0, |c| c.y),
            living_quality = settlement.living_quality,
            "Settlement founded"
        );
        Ok(settlement)
    }

    fn validate_name(&self, name: &str) -> Result<String, WorldError> {
        let name = name.trim();
        if name.chars().count() < self.rules.min_name_length {
            return Err(WorldError::NameTooShort {
                min: self.rules.min_name_length,
            });
        }
        if name.eq_ignore_ascii_case(CAPITAL_NAME) {
            return Err(WorldError::ReservedName {
                name: name.to_owned(),
            });
        }
        Ok(name.to_owned())
    }

    /// Centre of the automatic site search: the founder's current
    /// settlement if placed, else the capital, else the grid centre.
    async fn search_origin(&self, founder: Option<PlayerId>, grid: &WorldGrid) -> Coord {
        if let Some(player) = founder {
            if let Some(account) = self.ledger.player(player).await {
                if let Some(coord) = self
                    .ledger
                    .settlement(account.settlement)
                    .await
                    .and_then(|s| s.coord)
                {
                    return coord;
                }
            }
        }
        match self.capital().await.and_then(|c| c.coord) {
            Some(coord) => coord,
            None => grid.center(),
        }
    }

    /// Make the player's current settlement their home.
    ///
    /// Moving home releases the slot in the previous settlement. Settling
    /// again where the player already lives is a no-op.
    pub async fn settle(&self, player: PlayerId) -> Result<Settlement, WorldError> {
        let rules = &self.rules;
        let settlement = self
            .ledger
            .transact([RowKey::Player(player), RowKey::Home(player)], |tx| {
                let here = tx
                    .find_player(player)?
                    .ok_or(WorldError::UnknownPlayer(player))?
                    .settlement;
                let previous = tx.find_home(player)?;
                let target = tx.settlement(here)?;
                if !target.is_placed() {
                    return Err(WorldError::Unplaced { settlement: here });
                }
                if previous == Some(here) {
                    return Ok(target.clone());
                }
                let cap = rules.pop_cap(target.is_capital, target.living_quality);
                if target.residents >= cap {
                    return Err(WorldError::AtCapacity {
                        settlement: here,
                        cap,
                    });
                }

                if let Some(old) = previous {
                    if tx.find_settlement(old)?.is_some() {
                        let old = tx.settlement_mut(old)?;
                        old.residents = old.residents.saturating_sub(1);
                    }
                }
                let target = tx.settlement_mut(here)?;
                target.pop_cap = cap;
                target.residents = target.residents.saturating_add(1);
                let settled = target.clone();
                tx.set_home(player, here)?;
                Ok(settled)
            })
            .await?;
        info!(%player, settlement = %settlement.name, "Player settled");
        Ok(settlement)
    }

    /// Count a new building and recompute living quality and capacity.
    pub async fn record_building(
        &self,
        settlement: SettlementId,
        buffs: &BuildingBuffs,
    ) -> Result<Settlement, WorldError> {
        let rules = &self.rules;
        let updated = self
            .ledger
            .transact([RowKey::Settlement(settlement)], |tx| {
                let s = tx
                    .find_settlement(settlement)?
                    .ok_or(WorldError::UnknownSettlement(settlement))?
                    .clone();
                let count = s.building_count.saturating_add(1);
                let lq = rules.living_quality(s.base_living_quality, count, buffs.living_quality_bonus);
                let s = tx.settlement_mut(settlement)?;
                s.building_count = count;
                s.living_quality = lq;
                s.pop_cap = rules.pop_cap(s.is_capital, lq);
                Ok::<_, WorldError>(s.clone())
            })
            .await?;
        info!(
            settlement = %updated.name,
            living_quality = updated.living_quality,
            pop_cap = updated.pop_cap,
            "Living quality recalculated"
        );
        Ok(updated)
    }

    /// Remove every settlement except the capital.
    ///
    /// Treasury gold and market stock are written off, stakes dropped, homes
    /// detached, and players standing in a removed town moved to the
    /// capital. Jobs posted in or bound for a removed town are withdrawn and
    /// their claimants freed. Returns the removed ids.
    pub async fn reset(&self) -> Result<Vec<SettlementId>, WorldError> {
        let doomed: Vec<Settlement> = self
            .ledger
            .settlements()
            .await
            .into_iter()
            .filter(|s| !s.is_capital)
            .collect();
        if doomed.is_empty() {
            return Ok(Vec::new());
        }
        let ids: BTreeSet<SettlementId> = doomed.iter().map(|s| s.id).collect();
        let capital = self.capital().await.map(|c| c.id);

        let mut keys = vec![RowKey::Placement];
        for s in &doomed {
            keys.push(RowKey::Settlement(s.id));
            keys.push(RowKey::settlement_name(&s.name));
            keys.extend(Resource::ALL.into_iter().map(|r| RowKey::Stock(s.id, r)));
        }
        let attached = self
            .ledger
            .scan(|k| matches!(k, RowKey::Stake(..) | RowKey::Home(_) | RowKey::Player(_)))
            .await
            .into_iter()
            .filter(|(key, row)| match (key, row) {
                (RowKey::Stake(s, _, _), _) | (_, Row::Home(s)) => ids.contains(s),
                (_, Row::Player(p)) => ids.contains(&p.settlement),
                _ => false,
            })
            .map(|(key, _)| key);
        keys.extend(attached);

        let stale_jobs: Vec<JobId> = self
            .ledger
            .jobs()
            .await
            .into_iter()
            .filter(|j| {
                ids.contains(&j.settlement) || j.destination.is_some_and(|d| ids.contains(&d))
            })
            .map(|j| j.id)
            .collect();
        for id in &stale_jobs {
            keys.push(RowKey::Job(*id));
            keys.push(RowKey::JobClaim(*id));
            if let Some(Row::JobClaim(claim)) = self.ledger.read(&RowKey::JobClaim(*id)).await {
                keys.push(RowKey::ClaimSlot(claim.player));
            }
        }

        let scope = keys.clone();
        self.ledger
            .transact(keys, |tx| {
                for s in &doomed {
                    let Some(current) = tx.find_settlement(s.id)?.cloned() else {
                        continue;
                    };
                    tx.debit_treasury(s.id, current.treasury, Account::Void, EntryKind::Dissolution)?;
                    for resource in Resource::ALL {
                        let held = tx.stock(s.id, resource)?;
                        if held > 0 {
                            tx.take_stock(s.id, resource, held, Account::Void, EntryKind::Dissolution)?;
                        }
                        tx.remove(&RowKey::Stock(s.id, resource))?;
                    }
                    tx.remove(&RowKey::settlement_name(&current.name))?;
                    tx.remove(&RowKey::Settlement(s.id))?;
                    tx.placement_mut()?.placed.remove(&s.id);
                }
                for id in &stale_jobs {
                    if let Some(claim) = tx.find_job_claim(*id)?.cloned() {
                        let slot = tx.claim_slot_mut(claim.player)?;
                        if slot.active.as_ref().is_some_and(|c| c.job == *id) {
                            slot.active = None;
                        }
                    }
                    if tx.find_job(*id)?.is_some() {
                        tx.remove_job(*id)?;
                    }
                }
                for key in &scope {
                    match key {
                        RowKey::Stake(s, _, _) if ids.contains(s) => {
                            tx.remove(key)?;
                        }
                        RowKey::Home(player) => {
                            if tx.find_home(*player)?.is_some_and(|s| ids.contains(&s)) {
                                tx.remove(key)?;
                            }
                        }
                        RowKey::Player(player) => {
                            let stranded = tx
                                .find_player(*player)?
                                .is_some_and(|p| ids.contains(&p.settlement));
                            if let (true, Some(capital)) = (stranded, capital) {
                                tx.player_mut(*player)?.settlement = capital;
                            }
                        }
                        _ => {}
                    }
                }
                Ok::<_, WorldError>(())
            })
            .await?;

        info!(
            removed = ids.len(),
            jobs = stale_jobs.len(),
            "Settlements reset"
        );
        Ok(ids.into_iter().collect())
    }

    /// Placed settlements as map markers, capital first, then by name.
    pub async fn markers(&self) -> Vec<SettlementMarker> {
        let mut markers: Vec<SettlementMarker> = self
            .ledger
            .settlements()
            .await
            .into_iter()
            .filter_map(|s| {
                let coord = s.coord?;
                Some(SettlementMarker {
                    id: s.id,
                    name: s.name,
                    coord,
                    is_capital: s.is_capital,
                    owner: s.owner,
                    residents: s.residents,
                })
            })
            .collect();
        markers.sort_by(|a, b| {
            b.is_capital
                .cmp(&a.is_capital)
                .then_with(|| a.name.cmp(&b.name))
        });
        markers
    }

    /// Grid cells with settlement markers, or `None` before generation.
    pub async fn snapshot(&self) -> Option<GridSnapshot> {
        let grid = self.world.grid().await?;
        Some(GridSnapshot {
            meta: grid.meta().clone(),
            cells: grid.cells().to_vec(),
            settlements: self.markers().await,
        })
    }
}
