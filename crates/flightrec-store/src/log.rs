//! Append-only JSONL event log — the system of record.
//!
//! One self-contained JSON object per line. The file is opened in append
//! mode and only ever grows; no compaction, no rewrites. Each append is a
//! single `write_all` of the full line (including the trailing newline)
//! under a mutex, so concurrent appends never interleave bytes, and readers
//! tailing the file see either a complete line or an unterminated tail that
//! the indexer knows to leave for the next pass.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use tracing::instrument;

use flightrec_core::TelemetryEvent;

use crate::errors::{Result, StoreError};

/// Append-only JSONL writer for [`TelemetryEvent`] records.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
    seq: AtomicI64,
}

impl EventLog {
    /// Open (creating if needed) the log file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            seq: AtomicI64::new(0),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, assigning `id`, `ts` and `seq` if not already set.
    ///
    /// The event is serialized to a single line and flushed before return;
    /// once this returns `Ok`, the record is on its way to disk and its
    /// identity fields are final.
    #[instrument(skip_all, fields(kind = %event.kind))]
    pub fn append(&self, event: &mut TelemetryEvent) -> Result<()> {
        if event.needs_identity() {
            event.id = TelemetryEvent::fresh_id();
            event.ts = chrono::Utc::now().timestamp_millis();
            event.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| StoreError::Internal("event log mutex poisoned".into()))?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
