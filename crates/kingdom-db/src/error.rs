//! Errors raised by the archive.

/// Failures while talking to `PostgreSQL` or decoding what it returned.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A query or connection failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Embedded migrations could not be applied.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A settlement snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection settings are unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value does not fit its column type.
    #[error("{field} value {value} does not fit its column")]
    OutOfRange {
        /// Which value overflowed.
        field: &'static str,
        /// The offending value.
        value: u64,
    },

    /// A stored row holds a value this build cannot interpret.
    #[error("Corrupt {table} row: {detail}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// A stored world grid failed validation.
    #[error("Stored world is invalid: {0}")]
    World(#[from] kingdom_world::WorldError),
}

impl DbError {
    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            detail: detail.into(),
        }
    }
}

/// Convert an unsigned quantity to a `BIGINT` column value.
pub(crate) fn to_bigint(field: &'static str, value: u64) -> Result<i64, DbError> {
    i64::try_from(value)
        .ok()
        .ok_or(DbError::OutOfRange { field, value })
}

/// Convert an unsigned coordinate or count to an `INTEGER` column value.
pub(crate) fn to_int(field: &'static str, value: u32) -> Result<i32, DbError> {
    i32::try_from(value).ok().ok_or(DbError::OutOfRange {
        field,
        value: u64::from(value),
    })
}

/// Read an `INTEGER` column back as an unsigned value.
pub(crate) fn from_int(table: &'static str, value: i32) -> Result<u32, DbError> {
    u32::try_from(value)
        .ok()
        .ok_or_else(|| DbError::corrupt(table, format!("negative value {value}")))
}
