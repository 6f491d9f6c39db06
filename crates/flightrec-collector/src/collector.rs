//! Fail-soft event collector.
//!
//! One method per agent lifecycle point. Every method returns `()`: a
//! telemetry failure is logged and counted, never surfaced to the producer.
//! The hot path is append-to-log; indexing is pushed inline when enabled
//! and always recoverable later via catch-up.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use flightrec_core::{
    BlobKind, CaptureSettings, ErrorInfo, EventKind, EventSource, TelemetryEvent,
};
use flightrec_store::{BlobStore, EventLog, Indexer, StoreError};

use crate::arena::RunArena;
use crate::capture::apply_capture;
use crate::context::HookContext;
use crate::extract::{extract_exec_command, extract_file_path};

/// Counter: events appended to the log.
pub const METRIC_EVENTS_RECORDED: &str = "flightrec_collector_events_recorded_total";
/// Counter: events lost to an internal error.
pub const METRIC_EVENTS_DROPPED: &str = "flightrec_collector_events_dropped_total";

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle info
// ─────────────────────────────────────────────────────────────────────────────

/// Token counters reported by the producer.
#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

/// Session boundary details.
#[derive(Clone, Debug, Default)]
pub struct SessionInfo {
    /// Channel the session is attached to.
    pub channel: Option<String>,
}

/// `run.start` details.
#[derive(Clone, Debug, Default)]
pub struct RunStartInfo {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub is_heartbeat: Option<bool>,
    pub origin_channel: Option<String>,
}

/// `run.end` details. Counters left `None` are backfilled from the arena.
#[derive(Clone, Debug, Default)]
pub struct RunEndInfo {
    pub stop_reason: Option<String>,
    pub model: Option<String>,
    pub duration_ms: Option<i64>,
    pub usage: Option<TokenUsage>,
    pub tool_call_count: Option<i64>,
    pub compaction_count: Option<i64>,
    pub error: Option<String>,
}

/// `tool.start` details.
#[derive(Clone, Debug, Default)]
pub struct ToolStartInfo {
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    /// Raw tool arguments, subject to capture policy and externalization.
    pub params: Option<Value>,
}

/// `tool.end` details.
#[derive(Clone, Debug, Default)]
pub struct ToolEndInfo {
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub is_error: Option<bool>,
    pub error: Option<String>,
    /// Raw tool arguments, used for path/command extraction.
    pub params: Option<Value>,
    /// Raw tool result, subject to capture policy and externalization.
    pub result: Option<Value>,
}

/// Message details (either direction).
#[derive(Clone, Debug, Default)]
pub struct MessageInfo {
    pub channel: Option<String>,
    pub from: Option<String>,
    pub content_preview: Option<String>,
}

/// `subagent.spawn` details.
#[derive(Clone, Debug, Default)]
pub struct SubagentSpawnInfo {
    pub child_session_key: Option<String>,
    pub task: Option<String>,
    pub label: Option<String>,
    pub model: Option<String>,
}

/// `subagent.end` details.
#[derive(Clone, Debug, Default)]
pub struct SubagentEndInfo {
    pub child_session_key: Option<String>,
    pub outcome: Option<String>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// Compaction boundary details.
#[derive(Clone, Debug, Default)]
pub struct CompactionInfo {
    pub reason: Option<String>,
    pub duration_ms: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Collector
// ─────────────────────────────────────────────────────────────────────────────

/// Producer-facing telemetry recorder.
pub struct Collector {
    log: Arc<EventLog>,
    blobs: BlobStore,
    indexer: Option<Indexer>,
    capture: CaptureSettings,
    blob_threshold_bytes: usize,
    arena: RunArena,
}

impl Collector {
    /// Wire a collector over its durable sinks. `indexer` enables push-mode
    /// indexing right after each append.
    pub fn new(
        log: Arc<EventLog>,
        blobs: BlobStore,
        indexer: Option<Indexer>,
        capture: CaptureSettings,
        blob_threshold_bytes: usize,
    ) -> Self {
        Self {
            log,
            blobs,
            indexer,
            capture,
            blob_threshold_bytes,
            arena: RunArena::new(),
        }
    }

    /// Runs currently tracked in the arena.
    pub fn runs_in_flight(&self) -> usize {
        self.arena.in_flight()
    }

    // ── hook callbacks ──────────────────────────────────────────────────

    /// Session created.
    pub fn session_start(&self, ctx: &HookContext, info: &SessionInfo) {
        let mut data = Map::new();
        insert_str(&mut data, "channel", info.channel.clone());
        self.record(self.hook_event(EventKind::SessionStart, ctx, data, None));
    }

    /// Session ended.
    pub fn session_end(&self, ctx: &HookContext, info: &SessionInfo) {
        let mut data = Map::new();
        insert_str(&mut data, "channel", info.channel.clone());
        self.record(self.hook_event(EventKind::SessionEnd, ctx, data, None));
    }

    /// Run started.
    pub fn run_start(&self, ctx: &HookContext, info: &RunStartInfo) {
        if let Some(run_id) = &ctx.run_id {
            self.arena.begin(run_id);
        }
        let mut data = Map::new();
        insert_str(&mut data, "provider", info.provider.clone());
        insert_str(&mut data, "model", info.model.clone());
        insert_bool(&mut data, "isHeartbeat", info.is_heartbeat);
        insert_str(&mut data, "originChannel", info.origin_channel.clone());
        self.record(self.hook_event(EventKind::RunStart, ctx, data, None));
    }

    /// Run finished. Counters the producer did not supply come from the
    /// arena.
    pub fn run_end(&self, ctx: &HookContext, info: &RunEndInfo) {
        let counters = ctx.run_id.as_deref().and_then(|id| self.arena.finish(id));

        let mut data = Map::new();
        insert_str(&mut data, "stopReason", info.stop_reason.clone());
        insert_str(&mut data, "model", info.model.clone());
        insert_i64(&mut data, "durationMs", info.duration_ms);
        insert_i64(
            &mut data,
            "toolCallCount",
            info.tool_call_count
                .or_else(|| counters.map(|c| i64::try_from(c.tool_calls).unwrap_or(i64::MAX))),
        );
        insert_i64(
            &mut data,
            "compactionCount",
            info.compaction_count
                .or_else(|| counters.map(|c| i64::try_from(c.compactions).unwrap_or(i64::MAX))),
        );
        if let Some(usage) = &info.usage {
            if let Ok(value) = serde_json::to_value(usage) {
                let _ = data.insert("usage".into(), value);
            }
        }
        self.record(self.hook_event(EventKind::RunEnd, ctx, data, info.error.clone()));
    }

    /// Tool invocation started.
    pub fn tool_start(&self, ctx: &HookContext, info: &ToolStartInfo) {
        let mut data = Map::new();
        insert_str(&mut data, "toolName", info.tool_name.clone());
        insert_str(&mut data, "toolCallId", info.tool_call_id.clone());
        if let Some(params) = info.params.clone() {
            if let Some(kept) = apply_capture(params, self.capture.inputs) {
                let _ = data.insert("params".into(), kept);
            }
        }
        self.record(self.hook_event(EventKind::ToolStart, ctx, data, None));
    }

    /// Tool invocation finished. File path and executed command are
    /// extracted from the raw arguments before capture policy applies.
    pub fn tool_end(&self, ctx: &HookContext, info: &ToolEndInfo) {
        if let Some(run_id) = &ctx.run_id {
            self.arena.note_tool_end(run_id);
        }

        let mut data = Map::new();
        insert_str(&mut data, "toolName", info.tool_name.clone());
        insert_str(&mut data, "toolCallId", info.tool_call_id.clone());
        insert_i64(&mut data, "durationMs", info.duration_ms);
        insert_bool(&mut data, "isError", info.is_error);

        if let (Some(tool_name), Some(params)) = (&info.tool_name, &info.params) {
            insert_str(&mut data, "filePath", extract_file_path(tool_name, params));
            insert_str(
                &mut data,
                "execCommand",
                extract_exec_command(tool_name, params),
            );
        }
        if let Some(result) = info.result.clone() {
            if let Some(kept) = apply_capture(result, self.capture.results) {
                let _ = data.insert("result".into(), kept);
            }
        }
        self.record(self.hook_event(EventKind::ToolEnd, ctx, data, info.error.clone()));
    }

    /// Message received by the agent.
    pub fn message_inbound(&self, ctx: &HookContext, info: &MessageInfo) {
        self.record(self.hook_event(
            EventKind::MessageInbound,
            ctx,
            message_data(info),
            None,
        ));
    }

    /// Message sent by the agent.
    pub fn message_outbound(&self, ctx: &HookContext, info: &MessageInfo) {
        self.record(self.hook_event(
            EventKind::MessageOutbound,
            ctx,
            message_data(info),
            None,
        ));
    }

    /// Sub-agent spawned.
    pub fn subagent_spawn(&self, ctx: &HookContext, info: &SubagentSpawnInfo) {
        let mut data = Map::new();
        insert_str(&mut data, "childSessionKey", info.child_session_key.clone());
        insert_str(&mut data, "task", info.task.clone());
        insert_str(&mut data, "label", info.label.clone());
        insert_str(&mut data, "model", info.model.clone());
        self.record(self.hook_event(EventKind::SubagentSpawn, ctx, data, None));
    }

    /// Sub-agent finished.
    pub fn subagent_end(&self, ctx: &HookContext, info: &SubagentEndInfo) {
        let mut data = Map::new();
        insert_str(&mut data, "childSessionKey", info.child_session_key.clone());
        insert_str(&mut data, "outcome", info.outcome.clone());
        insert_i64(&mut data, "durationMs", info.duration_ms);
        self.record(self.hook_event(EventKind::SubagentEnd, ctx, data, info.error.clone()));
    }

    /// Context compaction started.
    pub fn compaction_start(&self, ctx: &HookContext, info: &CompactionInfo) {
        let mut data = Map::new();
        insert_str(&mut data, "reason", info.reason.clone());
        self.record(self.hook_event(EventKind::CompactionStart, ctx, data, None));
    }

    /// Context compaction finished.
    pub fn compaction_end(&self, ctx: &HookContext, info: &CompactionInfo) {
        if let Some(run_id) = &ctx.run_id {
            self.arena.note_compaction(run_id);
        }
        let mut data = Map::new();
        insert_str(&mut data, "reason", info.reason.clone());
        insert_i64(&mut data, "durationMs", info.duration_ms);
        self.record(self.hook_event(EventKind::CompactionEnd, ctx, data, None));
    }

    // ── diagnostic bus side ─────────────────────────────────────────────

    /// Periodic token-usage snapshot from the diagnostic bus.
    pub fn usage_snapshot(&self, ctx: &HookContext, data: Value) {
        let mut event = TelemetryEvent::new(EventKind::UsageSnapshot, EventSource::DiagnosticEvent);
        apply_context(&mut event, ctx);
        event.data = normalize_object(data);
        self.record(event);
    }

    /// Per-call model accounting from the diagnostic bus. A missing
    /// `callIndex` gets the run's next ordinal from the arena.
    pub fn model_call(&self, ctx: &HookContext, data: Value) {
        let mut data = normalize_object(data);
        if data.get("callIndex").is_none() {
            if let Some(run_id) = &ctx.run_id {
                let index = self.arena.next_call_index(run_id);
                if let Some(map) = data.as_object_mut() {
                    let _ = map.insert("callIndex".into(), Value::from(index));
                }
            }
        }
        let mut event = TelemetryEvent::new(EventKind::LlmCall, EventSource::DiagnosticEvent);
        apply_context(&mut event, ctx);
        event.data = data;
        self.record(event);
    }

    // ── internals ───────────────────────────────────────────────────────

    fn hook_event(
        &self,
        kind: EventKind,
        ctx: &HookContext,
        data: Map<String, Value>,
        error: Option<String>,
    ) -> TelemetryEvent {
        let mut event = TelemetryEvent::new(kind, EventSource::Hook);
        apply_context(&mut event, ctx);
        event.data = Value::Object(data);
        event.error = error.map(|message| ErrorInfo { message });
        event
    }

    /// The fail-soft boundary: log and count, never propagate.
    fn record(&self, mut event: TelemetryEvent) {
        if let Err(e) = self.try_record(&mut event) {
            counter!(METRIC_EVENTS_DROPPED).increment(1);
            warn!(kind = %event.kind, error = %e, "dropping telemetry event");
        }
    }

    fn try_record(&self, event: &mut TelemetryEvent) -> Result<(), StoreError> {
        self.externalize_oversized(event)?;
        self.log.append(event)?;
        if let Some(indexer) = &self.indexer {
            let _ = indexer.index_event(event)?;
        }
        counter!(METRIC_EVENTS_RECORDED).increment(1);
        Ok(())
    }

    /// Move oversized `params`/`result` payloads to the blob store,
    /// replacing each with a reference. The two fields are judged
    /// independently.
    fn externalize_oversized(&self, event: &mut TelemetryEvent) -> Result<(), StoreError> {
        for (key, kind) in [("params", BlobKind::Input), ("result", BlobKind::Result)] {
            let oversized = event
                .data
                .get(key)
                .is_some_and(|v| v.to_string().len() > self.blob_threshold_bytes);
            if !oversized {
                continue;
            }
            let Some(map) = event.data.as_object_mut() else {
                continue;
            };
            let Some(value) = map.remove(key) else {
                continue;
            };
            let blob_ref = self.blobs.write(&value, kind)?;
            event.push_blob_ref(blob_ref);
        }
        Ok(())
    }
}

fn apply_context(event: &mut TelemetryEvent, ctx: &HookContext) {
    event.agent_id = ctx.agent_id.clone();
    event.session_key = ctx.session_key.clone();
    event.session_id = ctx.session_id.clone();
    event.run_id = ctx.run_id.clone();
}

fn message_data(info: &MessageInfo) -> Map<String, Value> {
    let mut data = Map::new();
    insert_str(&mut data, "channel", info.channel.clone());
    insert_str(&mut data, "from", info.from.clone());
    insert_str(&mut data, "contentPreview", info.content_preview.clone());
    data
}

fn normalize_object(data: Value) -> Value {
    if data.is_object() {
        data
    } else {
        Value::Object(Map::new())
    }
}

fn insert_str(map: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(v) = value {
        let _ = map.insert(key.to_owned(), Value::String(v));
    }
}

fn insert_i64(map: &mut Map<String, Value>, key: &str, value: Option<i64>) {
    if let Some(v) = value {
        let _ = map.insert(key.to_owned(), Value::from(v));
    }
}

fn insert_bool(map: &mut Map<String, Value>, key: &str, value: Option<bool>) {
    if let Some(v) = value {
        let _ = map.insert(key.to_owned(), Value::Bool(v));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use flightrec_core::CaptureMode;
    use flightrec_store::open_memory_pool;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        collector: Collector,
        log_path: std::path::PathBuf,
        indexer: Indexer,
    }

    fn setup(capture: CaptureSettings, threshold: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("events.jsonl");
        let log = Arc::new(EventLog::open(&log_path).unwrap());
        let blobs = BlobStore::open(dir.path().join("blobs")).unwrap();
        let indexer = Indexer::new(open_memory_pool().unwrap()).unwrap();
        let collector = Collector::new(log, blobs, Some(indexer.clone()), capture, threshold);
        Fixture {
            _dir: dir,
            collector,
            log_path,
            indexer,
        }
    }

    fn logged_events(fx: &Fixture) -> Vec<TelemetryEvent> {
        std::fs::read_to_string(&fx.log_path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn ctx() -> HookContext {
        HookContext::for_session("sess-1").with_run("run-1")
    }

    #[test]
    fn run_end_backfills_counts_from_the_arena() {
        let fx = setup(CaptureSettings::default(), 1 << 20);
        fx.collector.run_start(&ctx(), &RunStartInfo::default());
        fx.collector.tool_end(&ctx(), &ToolEndInfo::default());
        fx.collector.tool_end(&ctx(), &ToolEndInfo::default());
        fx.collector.compaction_end(&ctx(), &CompactionInfo::default());
        fx.collector.run_end(&ctx(), &RunEndInfo::default());

        let events = logged_events(&fx);
        let end = events.iter().find(|e| e.kind == "run.end").unwrap();
        assert_eq!(end.data["toolCallCount"], 2);
        assert_eq!(end.data["compactionCount"], 1);
        assert_eq!(fx.collector.runs_in_flight(), 0);
    }

    #[test]
    fn producer_supplied_counts_beat_the_arena() {
        let fx = setup(CaptureSettings::default(), 1 << 20);
        fx.collector.run_start(&ctx(), &RunStartInfo::default());
        fx.collector.tool_end(&ctx(), &ToolEndInfo::default());
        fx.collector.run_end(
            &ctx(),
            &RunEndInfo {
                tool_call_count: Some(9),
                ..Default::default()
            },
        );

        let events = logged_events(&fx);
        let end = events.iter().find(|e| e.kind == "run.end").unwrap();
        assert_eq!(end.data["toolCallCount"], 9);
    }

    #[test]
    fn oversized_result_is_externalized() {
        let fx = setup(CaptureSettings::default(), 64);
        let big = json!({"output": "x".repeat(500)});
        fx.collector.tool_end(
            &ctx(),
            &ToolEndInfo {
                tool_name: Some("Bash".into()),
                result: Some(big.clone()),
                ..Default::default()
            },
        );

        let events = logged_events(&fx);
        let end = &events[0];
        assert!(end.data.get("result").is_none());
        let refs = end.blob_refs.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, BlobKind::Result);
        assert!(refs[0].id.starts_with("blob_"));
    }

    #[test]
    fn small_payloads_stay_inline() {
        let fx = setup(CaptureSettings::default(), 1 << 20);
        fx.collector.tool_start(
            &ctx(),
            &ToolStartInfo {
                tool_name: Some("Read".into()),
                params: Some(json!({"file_path": "/a.rs"})),
                ..Default::default()
            },
        );

        let events = logged_events(&fx);
        assert_eq!(events[0].data["params"]["file_path"], "/a.rs");
        assert!(events[0].blob_refs.is_none());
    }

    #[test]
    fn params_and_result_are_judged_independently() {
        let fx = setup(CaptureSettings::default(), 64);
        fx.collector.tool_end(
            &ctx(),
            &ToolEndInfo {
                tool_name: Some("Bash".into()),
                params: Some(json!({"command": "ls"})),
                result: Some(json!({"output": "y".repeat(500)})),
                ..Default::default()
            },
        );

        let events = logged_events(&fx);
        let refs = events[0].blob_refs.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, BlobKind::Result);
    }

    #[test]
    fn capture_off_drops_inputs() {
        let fx = setup(
            CaptureSettings {
                inputs: CaptureMode::Off,
                results: CaptureMode::Full,
            },
            1 << 20,
        );
        fx.collector.tool_start(
            &ctx(),
            &ToolStartInfo {
                tool_name: Some("Write".into()),
                params: Some(json!({"file_path": "/secret"})),
                ..Default::default()
            },
        );

        let events = logged_events(&fx);
        assert!(events[0].data.get("params").is_none());
    }

    #[test]
    fn capture_summary_replaces_results_with_a_preview() {
        let fx = setup(
            CaptureSettings {
                inputs: CaptureMode::Full,
                results: CaptureMode::Summary,
            },
            1 << 20,
        );
        fx.collector.tool_end(
            &ctx(),
            &ToolEndInfo {
                tool_name: Some("Bash".into()),
                result: Some(json!({"output": "z".repeat(1000)})),
                ..Default::default()
            },
        );

        let events = logged_events(&fx);
        let result = &events[0].data["result"];
        assert_eq!(result["summary"], true);
        assert_eq!(result["type"], "object");
    }

    #[test]
    fn tool_end_extracts_path_and_command_from_raw_params() {
        // Capture Off must not break extraction: it runs on the raw args.
        let fx = setup(
            CaptureSettings {
                inputs: CaptureMode::Off,
                results: CaptureMode::Off,
            },
            1 << 20,
        );
        fx.collector.tool_end(
            &ctx(),
            &ToolEndInfo {
                tool_name: Some("Read".into()),
                params: Some(json!({"file_path": "/src/lib.rs"})),
                ..Default::default()
            },
        );
        fx.collector.tool_end(
            &ctx(),
            &ToolEndInfo {
                tool_name: Some("Bash".into()),
                params: Some(json!({"command": "cargo doc"})),
                ..Default::default()
            },
        );

        let events = logged_events(&fx);
        assert_eq!(events[0].data["filePath"], "/src/lib.rs");
        assert_eq!(events[1].data["execCommand"], "cargo doc");
    }

    #[test]
    fn push_mode_indexes_inline() {
        let fx = setup(CaptureSettings::default(), 1 << 20);
        fx.collector.run_start(&ctx(), &RunStartInfo::default());

        let conn = fx.indexer.pool().get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn model_call_assigns_monotonic_call_index() {
        let fx = setup(CaptureSettings::default(), 1 << 20);
        fx.collector.run_start(&ctx(), &RunStartInfo::default());
        fx.collector
            .model_call(&ctx(), json!({"model": "m-1", "inputTokens": 10}));
        fx.collector
            .model_call(&ctx(), json!({"model": "m-1", "inputTokens": 20}));
        fx.collector
            .model_call(&ctx(), json!({"model": "m-1", "callIndex": 99}));

        let events = logged_events(&fx);
        let indices: Vec<i64> = events
            .iter()
            .filter(|e| e.kind == "llm.call")
            .map(|e| e.data["callIndex"].as_i64().unwrap())
            .collect();
        assert_eq!(indices, vec![1, 2, 99]);
    }

    #[test]
    fn diagnostic_events_carry_their_source() {
        let fx = setup(CaptureSettings::default(), 1 << 20);
        fx.collector
            .usage_snapshot(&ctx(), json!({"usage": {"input": 5}}));

        let events = logged_events(&fx);
        assert_eq!(events[0].kind, "usage.snapshot");
        assert_eq!(events[0].source, EventSource::DiagnosticEvent);
    }

    #[test]
    fn messages_record_direction_specific_kinds() {
        let fx = setup(CaptureSettings::default(), 1 << 20);
        fx.collector.message_inbound(
            &ctx(),
            &MessageInfo {
                channel: Some("chat".into()),
                from: Some("user-1".into()),
                content_preview: Some("hello".into()),
            },
        );
        fx.collector
            .message_outbound(&ctx(), &MessageInfo::default());

        let events = logged_events(&fx);
        assert_eq!(events[0].kind, "message.inbound");
        assert_eq!(events[0].data["from"], "user-1");
        assert_eq!(events[1].kind, "message.outbound");
    }
}
