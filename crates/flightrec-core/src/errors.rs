//! Error types for settings loading.

use thiserror::Error;

/// Errors raised while loading [`crate::TelemetrySettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid JSON or has the wrong shape.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
