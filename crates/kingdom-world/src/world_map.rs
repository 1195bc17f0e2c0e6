//! The generated terrain grid and the shared handle that holds it.
//!
//! [`WorldGrid`] is immutable once built: a row-major vector of
//! [`WorldCell`]s plus the [`WorldMeta`] describing it. [`World`] owns the
//! current grid behind an async lock. A replacement is built off to the
//! side and swapped in whole, so readers never see a partial grid, and a
//! generation that fails before the swap leaves the old grid in place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::info;

use kingdom_types::{Biome, Coord, WorldCell, WorldMeta};

use crate::error::WorldError;
use crate::terrain::{self, Sfc32};

/// Smallest accepted grid edge.
pub const MIN_SIZE: u32 = 32;

/// Largest accepted grid edge.
pub const MAX_SIZE: u32 = 512;

/// Grid edge used when none is given.
pub const DEFAULT_SIZE: u32 = 256;

/// Seed used when none is given.
pub const DEFAULT_SEED: &str = "kingdom";

/// Clamp a requested grid edge into [`MIN_SIZE`]`..=`[`MAX_SIZE`].
pub const fn clamp_size(size: u32) -> u32 {
    if size < MIN_SIZE {
        MIN_SIZE
    } else if size > MAX_SIZE {
        MAX_SIZE
    } else {
        size
    }
}

/// World generation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldGenConfig {
    /// Seed string hashed into the terrain PRNG.
    pub seed: String,
    /// Grid edge length; clamped on use.
    pub size: u32,
    /// How many of the best cells the capital may be chosen from.
    pub capital_candidates: usize,
}

impl Default for WorldGenConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED.to_owned(),
            size: DEFAULT_SIZE,
            capital_candidates: 400,
        }
    }
}

// ---------------------------------------------------------------------------
// WorldGrid
// ---------------------------------------------------------------------------

/// A complete, immutable terrain grid.
#[derive(Debug, Clone)]
pub struct WorldGrid {
    meta: WorldMeta,
    cells: Vec<WorldCell>,
}

impl WorldGrid {
    /// Build a `size`x`size` grid from `seed`.
    ///
    /// Cells are produced row by row. The PRNG is drawn in that order, so the
    /// same seed and size always give the same grid.
    pub fn generate(seed: &str, size: u32, now: DateTime<Utc>) -> Self {
        let size = clamp_size(size);
        let mut rng = Sfc32::from_str_seed(seed);
        let capacity = usize::try_from(u64::from(size).saturating_mul(u64::from(size)))
            .unwrap_or(0);
        let mut cells = Vec::with_capacity(capacity);
        for y in 0..size {
            for x in 0..size {
                let elevation = terrain::elevation(x, y, size, size);
                let biome = terrain::classify(elevation, &mut rng);
                let living_quality = terrain::living_quality(elevation, &mut rng);
                cells.push(WorldCell {
                    x,
                    y,
                    biome,
                    elevation,
                    living_quality,
                });
            }
        }
        Self {
            meta: WorldMeta {
                seed: seed.to_owned(),
                width: size,
                height: size,
                capital: None,
                generated_at: now,
            },
            cells,
        }
    }

    /// Rebuild a grid from stored parts.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::CorruptGrid`] if the cells do not cover the
    /// grid exactly once in row-major order.
    pub fn from_parts(meta: WorldMeta, mut cells: Vec<WorldCell>) -> Result<Self, WorldError> {
        cells.sort_by_key(|c| (c.y, c.x));
        let expected = u64::from(meta.width).saturating_mul(u64::from(meta.height));
        let ordered = cells.iter().enumerate().all(|(i, c)| {
            let i = u64::try_from(i).unwrap_or(u64::MAX);
            u64::from(c.y)
                .checked_mul(u64::from(meta.width))
                .and_then(|row| row.checked_add(u64::from(c.x)))
                == Some(i)
        });
        if u64::try_from(cells.len()).ok() != Some(expected) || !ordered {
            return Err(WorldError::CorruptGrid {
                width: meta.width,
                height: meta.height,
                cells: cells.len(),
            });
        }
        Ok(Self { meta, cells })
    }

    /// Grid metadata.
    pub const fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    /// Every cell, row-major.
    pub fn cells(&self) -> &[WorldCell] {
        &self.cells
    }

    /// Whether `coord` lies inside the grid.
    pub const fn contains(&self, coord: Coord) -> bool {
        coord.x < self.meta.width && coord.y < self.meta.height
    }

    /// The cell at `coord`, if inside the grid.
    pub fn cell(&self, coord: Coord) -> Option<&WorldCell> {
        if !self.contains(coord) {
            return None;
        }
        let index = usize::try_from(coord.y)
            .ok()?
            .checked_mul(usize::try_from(self.meta.width).ok()?)?
            .checked_add(usize::try_from(coord.x).ok()?)?;
        self.cells.get(index)
    }

    /// Centre of the grid, rounded down.
    pub const fn center(&self) -> Coord {
        Coord::new(
            self.meta.width.saturating_sub(1) / 2,
            self.meta.height.saturating_sub(1) / 2,
        )
    }

    pub(crate) const fn set_capital(&mut self, capital: Option<Coord>) {
        self.meta.capital = capital;
    }

    /// Where the capital belongs: among the `candidates` non-ocean cells with
    /// the highest living quality, the one nearest the exact grid centre.
    ///
    /// Ties keep row-major order, both in the ranking and the distance.
    pub fn capital_site(&self, candidates: usize) -> Option<Coord> {
        let cx = (f64::from(self.meta.width) - 1.0) / 2.0;
        let cy = (f64::from(self.meta.height) - 1.0) / 2.0;
        let mut best: Option<(f64, Coord)> = None;
        for cell in self.ranked(|c| c.biome != Biome::Ocean, candidates) {
            let d = (f64::from(cell.x) - cx).hypot(f64::from(cell.y) - cy);
            if best.is_none_or(|(best_d, _)| d < best_d) {
                best = Some((d, cell.coord()));
            }
        }
        best.map(|(_, coord)| coord)
    }

    /// Cells inside the square window of radius `radius` around `center`
    /// that pass `filter`, best living quality first, at most `limit`.
    pub fn window(
        &self,
        center: Coord,
        radius: u32,
        filter: impl Fn(&WorldCell) -> bool,
        limit: usize,
    ) -> Vec<&WorldCell> {
        let x_lo = center.x.saturating_sub(radius);
        let y_lo = center.y.saturating_sub(radius);
        let x_hi = center.x.saturating_add(radius);
        let y_hi = center.y.saturating_add(radius);
        self.ranked(
            |c| c.x >= x_lo && c.x <= x_hi && c.y >= y_lo && c.y <= y_hi && filter(c),
            limit,
        )
    }

    fn ranked(&self, filter: impl Fn(&WorldCell) -> bool, limit: usize) -> Vec<&WorldCell> {
        let mut ranked: Vec<&WorldCell> = self.cells.iter().filter(|c| filter(c)).collect();
        ranked.sort_by(|a, b| b.living_quality.cmp(&a.living_quality));
        ranked.truncate(limit);
        ranked
    }
}

// ---------------------------------------------------------------------------
// World handle
// ---------------------------------------------------------------------------

/// Shared holder of the current grid.
#[derive(Debug, Default)]
pub struct World {
    grid: RwLock<Option<Arc<WorldGrid>>>,
    generating: Mutex<()>,
}

impl World {
    /// An empty world with no grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current grid, if generated.
    pub async fn grid(&self) -> Option<Arc<WorldGrid>> {
        self.grid.read().await.clone()
    }

    /// Metadata of the current grid.
    pub async fn meta(&self) -> Option<WorldMeta> {
        self.grid.read().await.as_ref().map(|g| g.meta().clone())
    }

    /// Serialize generations. Readers are not blocked.
    pub async fn begin_generation(&self) -> MutexGuard<'_, ()> {
        self.generating.lock().await
    }

    /// Build a grid without installing it.
    pub fn build(config: &WorldGenConfig, now: DateTime<Utc>) -> WorldGrid {
        let grid = WorldGrid::generate(&config.seed, config.size, now);
        info!(
            seed = %config.seed,
            width = grid.meta().width,
            height = grid.meta().height,
            "World grid generated"
        );
        grid
    }

    /// Install a grid, replacing any current one.
    pub async fn install(&self, grid: WorldGrid) -> Arc<WorldGrid> {
        let grid = Arc::new(grid);
        *self.grid.write().await = Some(Arc::clone(&grid));
        grid
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn small() -> WorldGrid {
        WorldGrid::generate("kingdom", 48, Utc::now())
    }

    #[test]
    fn size_is_clamped() {
        assert_eq!(clamp_size(4), MIN_SIZE);
        assert_eq!(clamp_size(10_000), MAX_SIZE);
        assert_eq!(clamp_size(100), 100);
        let g = WorldGrid::generate("x", 1, Utc::now());
        assert_eq!(g.meta().width, MIN_SIZE);
        assert_eq!(g.cells().len(), 32 * 32);
    }

    #[test]
    fn same_seed_same_grid() {
        let a = small();
        let b = small();
        assert_eq!(a.cells(), b.cells());
        let c = WorldGrid::generate("other", 48, Utc::now());
        assert_ne!(a.cells(), c.cells());
    }

    #[test]
    fn cells_are_row_major() {
        let g = small();
        let cell = g.cell(Coord::new(5, 7)).unwrap();
        assert_eq!((cell.x, cell.y), (5, 7));
        assert!(g.cell(Coord::new(48, 0)).is_none());
    }

    #[test]
    fn capital_is_on_land_and_among_the_best() {
        let g = small();
        let site = g.capital_site(400).unwrap();
        let cell = g.cell(site).unwrap();
        assert_ne!(cell.biome, Biome::Ocean);
    }

    #[test]
    fn capital_prefers_centre_among_equal_candidates() {
        let g = small();
        let site = g.capital_site(1).unwrap();
        let best = g
            .cells()
            .iter()
            .filter(|c| c.biome != Biome::Ocean)
            .map(|c| c.living_quality)
            .max()
            .unwrap();
        assert_eq!(g.cell(site).unwrap().living_quality, best);
    }

    #[test]
    fn window_respects_bounds_and_order() {
        let g = small();
        let center = g.center();
        let picks = g.window(center, 4, |c| c.biome != Biome::Ocean, 10);
        assert!(picks.len() <= 10);
        for c in &picks {
            assert!(c.coord().chebyshev(center) <= 4);
        }
        assert!(
            picks
                .windows(2)
                .all(|w| w.first().unwrap().living_quality >= w.get(1).unwrap().living_quality)
        );
    }

    #[test]
    fn from_parts_round_trip_and_rejects_gaps() {
        let g = small();
        let rebuilt = WorldGrid::from_parts(g.meta().clone(), g.cells().to_vec()).unwrap();
        assert_eq!(rebuilt.cells(), g.cells());
        let mut short = g.cells().to_vec();
        short.pop();
        assert!(WorldGrid::from_parts(g.meta().clone(), short).is_err());
    }

    #[tokio::test]
    async fn install_swaps_the_whole_grid() {
        let world = World::new();
        assert!(world.meta().await.is_none());
        let config = WorldGenConfig {
            seed: "a".to_owned(),
            size: 32,
            capital_candidates: 400,
        };
        let first = world.install(World::build(&config, Utc::now())).await;
        assert!(Arc::ptr_eq(&first, &world.grid().await.unwrap()));

        let other = WorldGenConfig {
            seed: "b".to_owned(),
            ..config
        };
        world.install(World::build(&other, Utc::now())).await;
        assert_eq!(world.meta().await.unwrap().seed, "b");
        assert_eq!(first.meta().seed, "a");
    }
}
