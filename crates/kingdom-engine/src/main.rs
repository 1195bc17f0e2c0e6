//! Server binary for the Kingdom simulation.
//!
//! Boots the simulation core and keeps its background sweeps running until
//! interrupted. The command and session layers attach to the same
//! [`Simulation`] handle; this binary only owns its lifecycle.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `kingdom-config.yaml` (or `KINGDOM_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Assemble the simulation and generate the world
//! 4. Connect to `PostgreSQL` and archive the world, if persistence is on
//! 5. Start the job, upkeep, and flush (or journal trim) sweeps
//! 6. Wait for Ctrl-C, then stop the sweeps, audit, and flush once more

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use kingdom_core::{ChannelSink, KingdomConfig, Scheduler, Simulation};
use kingdom_db::{PostgresConfig, PostgresPool};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Notices buffered per listener before the slowest one starts lagging.
const NOTICE_BUFFER: usize = 1024;

/// Config file read when `KINGDOM_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "kingdom-config.yaml";

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        seed = %config.world.seed,
        size = config.world.size,
        persistence = config.persistence.enabled,
        "kingdom-engine starting"
    );

    let sink = ChannelSink::new(NOTICE_BUFFER);
    spawn_notice_log(&sink);
    let sim = Arc::new(
        Simulation::builder(config.clone())
            .sink(Arc::new(sink))
            .build(),
    );

    let meta = sim.generate_world(None, None, false).await?;
    info!(
        seed = %meta.seed,
        width = meta.width,
        height = meta.height,
        capital = ?meta.capital,
        "World ready"
    );

    let archive = if config.persistence.enabled {
        let pool = PostgresPool::connect(&PostgresConfig::new(
            config.persistence.database_url.as_str(),
        ))
        .await?;
        pool.run_migrations().await?;
        kingdom_db::archive_world(pool.pool(), sim.registry().world()).await?;
        Some(pool)
    } else {
        info!("Persistence disabled, state lives in memory only");
        None
    };

    let mut scheduler = Scheduler::start(&sim);
    if archive.is_none() {
        // Nothing will store the journal, so only its audit tally is kept.
        let trimmed = Arc::clone(&sim);
        scheduler.every("journal-trim", config.persistence.flush_interval(), move || {
            let sim = Arc::clone(&trimmed);
            async move {
                let dropped = sim.ledger().discard_journal().await;
                debug!(dropped, "Journal trimmed");
            }
        });
    }
    if let Some(pool) = &archive {
        let pool = pool.clone();
        let flushed = Arc::clone(&sim);
        scheduler.every("flush", config.persistence.flush_interval(), move || {
            let pool = pool.clone();
            let sim = Arc::clone(&flushed);
            async move {
                if let Err(err) = kingdom_db::flush(pool.pool(), sim.ledger(), Utc::now()).await {
                    warn!(error = %err, "Archive flush failed");
                }
            }
        });
    }

    info!("kingdom-engine running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    scheduler.shutdown().await?;
    if let Err(err) = sim.audit().await {
        warn!(error = %err, "Journal does not balance at shutdown");
    }
    if let Some(pool) = archive {
        let report = kingdom_db::flush(pool.pool(), sim.ledger(), Utc::now()).await?;
        info!(
            journal = report.journal,
            settlements = report.settlements,
            "Final flush complete"
        );
        pool.close().await;
    }

    info!("kingdom-engine shutdown complete");
    Ok(())
}

/// Load configuration, falling back to defaults when the file is absent.
///
/// Environment overrides apply either way.
fn load_config() -> Result<KingdomConfig, EngineError> {
    let path = std::env::var_os("KINGDOM_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        return Ok(KingdomConfig::from_file(&path)?);
    }
    let mut config = KingdomConfig::default();
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Log every notice until the sink is dropped.
///
/// Stands in for the session layer, which would deliver notices to the
/// players in each settlement.
fn spawn_notice_log(sink: &ChannelSink) {
    let mut notices = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => match notice.settlement {
                    Some(settlement) => info!(%settlement, message = %notice.message, "Notice"),
                    None => info!(message = %notice.message, "Announcement"),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "Notice log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
