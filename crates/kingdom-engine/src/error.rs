//! Error types for the engine binary.

/// Everything that can stop the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: kingdom_core::config::ConfigError,
    },

    /// A simulation operation failed during boot or shutdown.
    #[error("simulation error: {source}")]
    Core {
        /// The underlying facade error.
        #[from]
        source: kingdom_core::CoreError,
    },

    /// The archive could not be reached or written.
    #[error("database error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: kingdom_db::DbError,
    },

    /// A background task failed to stop cleanly.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying join failure.
        #[from]
        source: kingdom_core::scheduler::SchedulerError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
