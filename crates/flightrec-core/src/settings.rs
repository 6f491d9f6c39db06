//! Telemetry settings with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`TelemetrySettings::default()`]
//! 2. **JSON file** — serde-defaulted fields, so partial files are fine
//! 3. **Environment variables** — `FLIGHTREC_*` overrides (highest priority)
//!
//! The capture modes decide how much of a tool/LLM payload is kept inline;
//! anything kept inline that still exceeds `blob_threshold_bytes` is
//! externalized to the blob store by the collector.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Default externalization threshold: payloads above this serialized size
/// move to the blob store.
pub const DEFAULT_BLOB_THRESHOLD_BYTES: usize = 16 * 1024;

/// How much of a producer payload field to retain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Keep the full value.
    #[default]
    Full,
    /// Keep a short preview (type tag, byte size, truncated text).
    Summary,
    /// Drop the value entirely.
    Off,
}

impl CaptureMode {
    fn from_env_str(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => Some(Self::Full),
            "summary" => Some(Self::Summary),
            "off" | "none" => Some(Self::Off),
            _ => None,
        }
    }
}

/// Capture policy for producer payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Tool/LLM call arguments (`data.params`).
    pub inputs: CaptureMode,
    /// Tool/LLM call results (`data.result`).
    pub results: CaptureMode,
}

/// Top-level telemetry settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Root directory for the log file, blob store and SQLite index.
    pub data_dir: PathBuf,
    /// Payload capture policy.
    pub capture: CaptureSettings,
    /// Serialized-size threshold for blob externalization.
    pub blob_threshold_bytes: usize,
    /// Index every event inline right after it is appended to the log.
    pub push_index: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".flightrec"),
            capture: CaptureSettings::default(),
            blob_threshold_bytes: DEFAULT_BLOB_THRESHOLD_BYTES,
            push_index: true,
        }
    }
}

impl TelemetrySettings {
    /// Path of the append-only JSONL event log.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Root directory of the blob store.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Path of the SQLite index database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }

    /// Load settings from a JSON file, then apply env overrides.
    ///
    /// A missing file is not an error — defaults plus env overrides apply.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(?path, "no settings file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply `FLIGHTREC_*` environment variable overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("FLIGHTREC_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(raw) = std::env::var("FLIGHTREC_CAPTURE_INPUTS") {
            if let Some(mode) = CaptureMode::from_env_str(&raw) {
                self.capture.inputs = mode;
            } else {
                tracing::warn!(value = %raw, "invalid FLIGHTREC_CAPTURE_INPUTS, ignoring");
            }
        }
        if let Ok(raw) = std::env::var("FLIGHTREC_CAPTURE_RESULTS") {
            if let Some(mode) = CaptureMode::from_env_str(&raw) {
                self.capture.results = mode;
            } else {
                tracing::warn!(value = %raw, "invalid FLIGHTREC_CAPTURE_RESULTS, ignoring");
            }
        }
        if let Ok(raw) = std::env::var("FLIGHTREC_BLOB_THRESHOLD") {
            if let Ok(bytes) = raw.trim().parse::<usize>() {
                self.blob_threshold_bytes = bytes;
            } else {
                tracing::warn!(value = %raw, "invalid FLIGHTREC_BLOB_THRESHOLD, ignoring");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
