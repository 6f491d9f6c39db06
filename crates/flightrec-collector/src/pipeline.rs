//! End-to-end wiring: settings in, collector + query API out.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use flightrec_core::TelemetrySettings;
use flightrec_store::{
    open_pool, BlobStore, CatchUpReport, EventLog, Indexer, QueryApi, Result, StoreError,
};

use crate::collector::Collector;
use crate::context::HookContext;
use crate::diagnostics::DiagnosticBus;

/// A fully wired telemetry pipeline.
///
/// Owns the durable sinks, the collector, the diagnostic bus and its
/// drain worker. Must be constructed inside a tokio runtime (the bus
/// worker is spawned at open time).
pub struct TelemetryPipeline {
    collector: Arc<Collector>,
    indexer: Indexer,
    bus: DiagnosticBus,
    log_path: PathBuf,
    worker: tokio::task::JoinHandle<()>,
}

impl TelemetryPipeline {
    /// Open every component under `settings.data_dir` and spawn the bus
    /// worker.
    pub fn open(settings: &TelemetrySettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)?;

        let log = Arc::new(EventLog::open(settings.log_path())?);
        let blobs = BlobStore::open(settings.blob_dir())?;
        let pool = open_pool(&settings.db_path())?;
        let indexer = Indexer::new(pool)?;

        let push = settings.push_index.then(|| indexer.clone());
        let collector = Arc::new(Collector::new(
            log,
            blobs,
            push,
            settings.capture,
            settings.blob_threshold_bytes,
        ));

        let bus = DiagnosticBus::new();
        let worker = spawn_bus_worker(&bus, Arc::clone(&collector));

        Ok(Self {
            collector,
            indexer,
            bus,
            log_path: settings.log_path(),
            worker,
        })
    }

    /// Producer-facing collector handle.
    pub fn collector(&self) -> Arc<Collector> {
        Arc::clone(&self.collector)
    }

    /// Handle for publishing diagnostic messages.
    pub fn bus(&self) -> DiagnosticBus {
        self.bus.clone()
    }

    /// Read-only query surface over the index.
    pub fn queries(&self) -> QueryApi {
        QueryApi::new(self.indexer.pool())
    }

    /// Replay the log into the index from the persisted bookmark.
    pub fn catch_up(&self) -> Result<CatchUpReport> {
        self.indexer.catch_up(&self.log_path)
    }
}

impl Drop for TelemetryPipeline {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Fail-fast accessor for hosts that hold the pipeline optionally: callers
/// get a distinguishable "unavailable" error instead of empty results when
/// telemetry was never initialized.
pub fn queries_or_unavailable(pipeline: Option<&TelemetryPipeline>) -> Result<QueryApi> {
    pipeline
        .map(TelemetryPipeline::queries)
        .ok_or(StoreError::Unavailable("telemetry indexer not initialized"))
}

/// Drain the bus into the collector until the channel closes.
fn spawn_bus_worker(bus: &DiagnosticBus, collector: Arc<Collector>) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => route_diagnostic(&collector, &msg),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "diagnostic bus worker lagged, messages lost");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Match diagnostic messages defensively: unknown types are ignored.
fn route_diagnostic(collector: &Collector, msg: &Value) {
    let ctx = HookContext::from_diagnostic(msg);
    let data = msg.get("data").cloned().unwrap_or(Value::Null);
    match msg.get("type").and_then(Value::as_str) {
        Some("usage.snapshot") => collector.usage_snapshot(&ctx, data),
        Some("model.call") => collector.model_call(&ctx, data),
        other => debug!(msg_type = ?other, "ignoring diagnostic message"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
