//! Error types for the store crate.

use thiserror::Error;

/// Errors raised by the log writer, blob store, indexer and query API.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite-level failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool failure.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Filesystem failure (log file, blob directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Event (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema migration failure.
    #[error("migration error: {message}")]
    Migration {
        /// What failed, including the migration version.
        message: String,
    },

    /// The backing store has not been initialized. Callers must be able to
    /// distinguish this from "no data".
    #[error("telemetry store unavailable: {0}")]
    Unavailable(&'static str),

    /// Invariant violation inside the store itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
