//! The [`TelemetryEvent`] struct — the canonical persisted event record.
//!
//! Events are stored as a flat struct with base fields at the top level and
//! a `data` payload kept as opaque [`serde_json::Value`]. This matches the
//! JSONL log format exactly: one serialized object per line.
//!
//! `kind` is carried as a plain string on the wire so that records written
//! by a newer producer survive round-trips through an older indexer; the
//! closed [`EventKind`] enum is used for construction and for projection
//! dispatch via [`EventKind::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Where an event entered the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Synchronous lifecycle hook callback.
    #[serde(rename = "hook")]
    Hook,
    /// Asynchronous message from the diagnostic bus.
    #[serde(rename = "diagnostic_event")]
    DiagnosticEvent,
}

/// Which side of a tool/model exchange an externalized blob came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    /// Call arguments (`data.params`).
    Input,
    /// Call result (`data.result`).
    Result,
}

impl BlobKind {
    /// Stable directory/tag name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Result => "result",
        }
    }
}

/// Opaque reference to a payload externalized into the blob store.
///
/// Stored inline on the owning event's `blobRefs`; the corresponding inline
/// field (`data.params` / `data.result`) is omitted when externalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Content-derived blob ID.
    pub id: String,
    /// Which field was externalized.
    pub kind: BlobKind,
}

/// Error details attached to an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable error message.
    pub message: String,
}

/// Closed set of lifecycle event kinds.
///
/// The wire format stores kinds as strings; records whose kind string is not
/// in this set are still accepted into the raw events table, they just drive
/// no projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Agent session created.
    SessionStart,
    /// Agent session ended.
    SessionEnd,
    /// Agent run (one prompt→response cycle) started.
    RunStart,
    /// Agent run finished.
    RunEnd,
    /// Tool invocation started.
    ToolStart,
    /// Tool invocation finished.
    ToolEnd,
    /// Message received by the agent.
    MessageInbound,
    /// Message sent by the agent.
    MessageOutbound,
    /// Sub-agent spawned.
    SubagentSpawn,
    /// Sub-agent finished.
    SubagentEnd,
    /// Context compaction started.
    CompactionStart,
    /// Context compaction finished.
    CompactionEnd,
    /// One LLM API call accounted.
    LlmCall,
    /// Periodic token-usage snapshot.
    UsageSnapshot,
}

/// All known kinds, in declaration order.
pub const ALL_EVENT_KINDS: &[EventKind] = &[
    EventKind::SessionStart,
    EventKind::SessionEnd,
    EventKind::RunStart,
    EventKind::RunEnd,
    EventKind::ToolStart,
    EventKind::ToolEnd,
    EventKind::MessageInbound,
    EventKind::MessageOutbound,
    EventKind::SubagentSpawn,
    EventKind::SubagentEnd,
    EventKind::CompactionStart,
    EventKind::CompactionEnd,
    EventKind::LlmCall,
    EventKind::UsageSnapshot,
];

impl EventKind {
    /// Wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "session.start",
            Self::SessionEnd => "session.end",
            Self::RunStart => "run.start",
            Self::RunEnd => "run.end",
            Self::ToolStart => "tool.start",
            Self::ToolEnd => "tool.end",
            Self::MessageInbound => "message.inbound",
            Self::MessageOutbound => "message.outbound",
            Self::SubagentSpawn => "subagent.spawn",
            Self::SubagentEnd => "subagent.end",
            Self::CompactionStart => "compaction.start",
            Self::CompactionEnd => "compaction.end",
            Self::LlmCall => "llm.call",
            Self::UsageSnapshot => "usage.snapshot",
        }
    }

    /// Parse a wire tag. Returns `None` for unknown kinds — callers must
    /// treat those as raw-only records, never as errors.
    pub fn parse(tag: &str) -> Option<Self> {
        ALL_EVENT_KINDS.iter().copied().find(|k| k.as_str() == tag)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical telemetry event.
///
/// Immutable once appended to the log. `id`, `ts` and `seq` are assigned by
/// the log writer at append time when left unset (empty / zero).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Globally unique event ID (UUID v7, `evt_` prefixed).
    #[serde(default)]
    pub id: String,
    /// Epoch milliseconds at append time.
    #[serde(default)]
    pub ts: i64,
    /// Monotonic sequence number within the writing process lifetime.
    #[serde(default)]
    pub seq: i64,
    /// Agent that produced the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Routing key of the owning session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Provider-side session identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Run this event belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Event kind tag (see [`EventKind`]).
    pub kind: String,
    /// Kind-specific payload (opaque JSON object).
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Where the event entered the pipeline.
    pub source: EventSource,
    /// Error details, when the underlying operation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// References to externalized payload fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_refs: Option<Vec<BlobRef>>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl TelemetryEvent {
    /// Build an event draft for a known kind. `id`/`ts`/`seq` are left for
    /// the log writer to assign.
    pub fn new(kind: EventKind, source: EventSource) -> Self {
        Self {
            id: String::new(),
            ts: 0,
            seq: 0,
            agent_id: None,
            session_key: None,
            session_id: None,
            run_id: None,
            kind: kind.as_str().to_owned(),
            data: empty_object(),
            source,
            error: None,
            blob_refs: None,
        }
    }

    /// Whether the log writer still needs to assign identity fields.
    pub fn needs_identity(&self) -> bool {
        self.id.is_empty()
    }

    /// Generate a fresh event ID.
    pub fn fresh_id() -> String {
        format!("evt_{}", Uuid::now_v7())
    }

    /// Typed view of the kind tag. `None` for unknown kinds.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.kind)
    }

    /// Record an externalized field.
    pub fn push_blob_ref(&mut self, blob_ref: BlobRef) {
        self.blob_refs.get_or_insert_with(Vec::new).push(blob_ref);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
