//! In-flight per-run counters.
//!
//! Producers often omit aggregates on `run.end` (tool-call count, compaction
//! count) and per-call ordinals on model accounting. The arena tracks them
//! from the events the collector sees, so the projections still get filled
//! in. Entries live from `run.start` to `run.end`; an entry for a run the
//! arena never saw start is created lazily so late joins still count.

use std::collections::HashMap;
use std::sync::Mutex;

/// Counters accumulated while a run is in flight.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunInFlight {
    /// Completed tool calls observed.
    pub tool_calls: u64,
    /// Completed compactions observed.
    pub compactions: u64,
    /// Model calls accounted so far.
    pub model_calls: u64,
}

/// Arena of in-flight runs, keyed by run id.
#[derive(Debug, Default)]
pub struct RunArena {
    inner: Mutex<HashMap<String, RunInFlight>>,
}

impl RunArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run start.
    pub fn begin(&self, run_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            let _ = map.entry(run_id.to_owned()).or_default();
        }
    }

    /// Count a completed tool call.
    pub fn note_tool_end(&self, run_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.entry(run_id.to_owned()).or_default().tool_calls += 1;
        }
    }

    /// Count a completed compaction.
    pub fn note_compaction(&self, run_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.entry(run_id.to_owned()).or_default().compactions += 1;
        }
    }

    /// Count a model call and return its 1-based ordinal within the run.
    pub fn next_call_index(&self, run_id: &str) -> u64 {
        match self.inner.lock() {
            Ok(mut map) => {
                let entry = map.entry(run_id.to_owned()).or_default();
                entry.model_calls += 1;
                entry.model_calls
            }
            Err(_) => 0,
        }
    }

    /// Remove and return the run's counters on `run.end`.
    pub fn finish(&self, run_id: &str) -> Option<RunInFlight> {
        self.inner.lock().ok().and_then(|mut map| map.remove(run_id))
    }

    /// Number of runs currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
