//! World grid and settlement snapshots.
//!
//! A grid is written in one transaction: the old world is deleted, the
//! metadata row inserted, and the cells inserted in `UNNEST` batches. A
//! reader therefore sees either the previous world or the new one, never a
//! mix. Settlements are stored as their latest snapshot, replaced wholesale
//! on every save.

use chrono::{DateTime, Utc};
use kingdom_types::{Biome, Coord, Settlement, WorldCell, WorldMeta};
use kingdom_world::WorldGrid;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, from_int, to_bigint, to_int};

/// Cells per `UNNEST` insert.
const CELL_BATCH: usize = 4096;

/// Reads and writes the `world_meta`, `world_cells`, and `settlements`
/// tables.
pub struct WorldStore<'a> {
    pool: &'a PgPool,
}

impl<'a> WorldStore<'a> {
    /// Bind to a pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Replace the stored world with `grid`.
    pub async fn save_grid(&self, grid: &WorldGrid) -> Result<(), DbError> {
        let meta = grid.meta();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM world_cells").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM world_meta").execute(&mut *tx).await?;

        let capital_x = meta.capital.map(|c| to_int("capital x", c.x)).transpose()?;
        let capital_y = meta.capital.map(|c| to_int("capital y", c.y)).transpose()?;
        sqlx::query(
            r"INSERT INTO world_meta (id, seed, width, height, capital_x, capital_y, generated_at)
              VALUES (1, $1, $2, $3, $4, $5, $6)",
        )
        .bind(&meta.seed)
        .bind(to_int("width", meta.width)?)
        .bind(to_int("height", meta.height)?)
        .bind(capital_x)
        .bind(capital_y)
        .bind(meta.generated_at)
        .execute(&mut *tx)
        .await?;

        for chunk in grid.cells().chunks(CELL_BATCH) {
            let len = chunk.len();
            let mut xs = Vec::with_capacity(len);
            let mut ys = Vec::with_capacity(len);
            let mut biomes = Vec::with_capacity(len);
            let mut elevations = Vec::with_capacity(len);
            let mut qualities = Vec::with_capacity(len);
            for cell in chunk {
                xs.push(to_int("cell x", cell.x)?);
                ys.push(to_int("cell y", cell.y)?);
                biomes.push(cell.biome.name());
                elevations.push(cell.elevation);
                qualities.push(cell.living_quality);
            }
            sqlx::query(
                r"INSERT INTO world_cells (x, y, biome, elevation, living_quality)
                  SELECT * FROM UNNEST($1::INTEGER[], $2::INTEGER[], $3::TEXT[], $4::DOUBLE PRECISION[], $5::INTEGER[])",
            )
            .bind(&xs)
            .bind(&ys)
            .bind(&biomes)
            .bind(&elevations)
            .bind(&qualities)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            seed = %meta.seed,
            cells = grid.cells().len(),
            "World grid archived"
        );
        Ok(())
    }

    /// Metadata of the stored world, if any.
    pub async fn load_meta(&self) -> Result<Option<WorldMeta>, DbError> {
        let row = sqlx::query_as::<_, MetaRow>(
            r"SELECT seed, width, height, capital_x, capital_y, generated_at
              FROM world_meta WHERE id = 1",
        )
        .fetch_optional(self.pool)
        .await?;
        row.map(MetaRow::into_meta).transpose()
    }

    /// The stored world, validated.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::World`] if the cells do not cover the grid, and
    /// [`DbError::Corrupt`] for an unknown biome or negative coordinate.
    pub async fn load_grid(&self) -> Result<Option<WorldGrid>, DbError> {
        let Some(meta) = self.load_meta().await? else {
            return Ok(None);
        };
        let rows = sqlx::query_as::<_, CellRow>(
            r"SELECT x, y, biome, elevation, living_quality
              FROM world_cells ORDER BY y, x",
        )
        .fetch_all(self.pool)
        .await?;
        let cells = rows
            .into_iter()
            .map(CellRow::into_cell)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(WorldGrid::from_parts(meta, cells)?))
    }

    /// Replace the settlement snapshots with `settlements`.
    ///
    /// Rows for settlements not in the list (dissolved towns) are removed
    /// first, so a reused name never collides with a stale row.
    pub async fn save_settlements(
        &self,
        settlements: &[Settlement],
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let len = settlements.len();
        let mut ids = Vec::with_capacity(len);
        let mut names = Vec::with_capacity(len);
        let mut capitals = Vec::with_capacity(len);
        let mut xs: Vec<Option<i32>> = Vec::with_capacity(len);
        let mut ys: Vec<Option<i32>> = Vec::with_capacity(len);
        let mut residents = Vec::with_capacity(len);
        let mut treasuries = Vec::with_capacity(len);
        let mut snapshots = Vec::with_capacity(len);
        for s in settlements {
            ids.push(s.id.into_inner());
            names.push(s.name.as_str());
            capitals.push(s.is_capital);
            xs.push(s.coord.map(|c| to_int("settlement x", c.x)).transpose()?);
            ys.push(s.coord.map(|c| to_int("settlement y", c.y)).transpose()?);
            residents.push(to_int("residents", s.residents)?);
            treasuries.push(to_bigint("treasury", s.treasury)?);
            snapshots.push(serde_json::to_value(s)?);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM settlements WHERE NOT (id = ANY($1))")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        if !ids.is_empty() {
            sqlx::query(
                r"INSERT INTO settlements (id, name, is_capital, x, y, residents, treasury, snapshot, updated_at)
                  SELECT u.id, u.name, u.is_capital, u.x, u.y, u.residents, u.treasury, u.snapshot, $9
                  FROM UNNEST($1::UUID[], $2::TEXT[], $3::BOOLEAN[], $4::INTEGER[], $5::INTEGER[], $6::INTEGER[], $7::BIGINT[], $8::JSONB[])
                    AS u(id, name, is_capital, x, y, residents, treasury, snapshot)
                  ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    is_capital = EXCLUDED.is_capital,
                    x = EXCLUDED.x,
                    y = EXCLUDED.y,
                    residents = EXCLUDED.residents,
                    treasury = EXCLUDED.treasury,
                    snapshot = EXCLUDED.snapshot,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(&ids)
            .bind(&names)
            .bind(&capitals)
            .bind(&xs)
            .bind(&ys)
            .bind(&residents)
            .bind(&treasuries)
            .bind(&snapshots)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = len, "Settlement snapshots saved");
        Ok(())
    }

    /// Every stored settlement snapshot, capital first then by name.
    pub async fn load_settlements(&self) -> Result<Vec<Settlement>, DbError> {
        let rows: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
            r"SELECT id, snapshot FROM settlements ORDER BY is_capital DESC, LOWER(name)",
        )
        .fetch_all(self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, snapshot)| {
                let settlement: Settlement = serde_json::from_value(snapshot)?;
                if settlement.id.into_inner() != id {
                    return Err(DbError::corrupt(
                        "settlements",
                        format!("snapshot of {} stored under {id}", settlement.id),
                    ));
                }
                Ok(settlement)
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct MetaRow {
    seed: String,
    width: i32,
    height: i32,
    capital_x: Option<i32>,
    capital_y: Option<i32>,
    generated_at: DateTime<Utc>,
}

impl MetaRow {
    fn into_meta(self) -> Result<WorldMeta, DbError> {
        let capital = match (self.capital_x, self.capital_y) {
            (Some(x), Some(y)) => Some(Coord::new(
                from_int("world_meta", x)?,
                from_int("world_meta", y)?,
            )),
            _ => None,
        };
        Ok(WorldMeta {
            seed: self.seed,
            width: from_int("world_meta", self.width)?,
            height: from_int("world_meta", self.height)?,
            capital,
            generated_at: self.generated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CellRow {
    x: i32,
    y: i32,
    biome: String,
    elevation: f64,
    living_quality: i32,
}

impl CellRow {
    fn into_cell(self) -> Result<WorldCell, DbError> {
        let biome = Biome::parse(&self.biome)
            .ok_or_else(|| DbError::corrupt("world_cells", format!("unknown biome {}", self.biome)))?;
        Ok(WorldCell {
            x: from_int("world_cells", self.x)?,
            y: from_int("world_cells", self.y)?,
            biome,
            elevation: self.elevation,
            living_quality: self.living_quality,
        })
    }
}
