//! Kind-dispatched projection handlers.
//!
//! Each lifecycle kind that feeds a derived table has a handler here; the
//! indexer dispatches through [`dispatch`] after the raw row insert. Kinds
//! with no handler (session boundaries, compaction markers, unknown kinds)
//! land in the raw `events` table only.
//!
//! Handlers run inside the indexer's transaction and must be idempotent-safe
//! in the sense that they are only ever invoked once per event id — the raw
//! `INSERT OR IGNORE` gate upstream guarantees that.

use rusqlite::{params, Connection};
use serde_json::Value;
use uuid::Uuid;

use flightrec_core::{EventKind, TelemetryEvent};

use crate::errors::Result;

type Handler = fn(&Connection, &TelemetryEvent) -> Result<()>;

/// Projection registry: one entry per kind that drives a derived table.
const HANDLERS: &[(EventKind, Handler)] = &[
    (EventKind::RunStart, project_run_start),
    (EventKind::RunEnd, project_run_end),
    (EventKind::ToolStart, project_tool_start),
    (EventKind::ToolEnd, project_tool_end),
    (EventKind::MessageInbound, project_message),
    (EventKind::MessageOutbound, project_message),
    (EventKind::SubagentSpawn, project_subagent_spawn),
    (EventKind::SubagentEnd, project_subagent_end),
    (EventKind::LlmCall, project_llm_call),
    (EventKind::UsageSnapshot, project_usage_snapshot),
];

/// Run the projection handler for this event's kind, if any.
///
/// Unknown kind strings and kinds without a handler are a no-op.
pub fn dispatch(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let Some(kind) = event.kind() else {
        return Ok(());
    };
    if let Some((_, handler)) = HANDLERS.iter().find(|(k, _)| *k == kind) {
        handler(conn, event)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload field access
// ─────────────────────────────────────────────────────────────────────────────

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn i64_field(data: &Value, key: &str) -> Option<i64> {
    data.get(key).and_then(Value::as_i64)
}

fn f64_field(data: &Value, key: &str) -> Option<f64> {
    data.get(key).and_then(Value::as_f64)
}

fn bool_field(data: &Value, key: &str) -> Option<bool> {
    data.get(key).and_then(Value::as_bool)
}

/// Token counters nested under `data.usage`.
struct UsageFields {
    input: Option<i64>,
    output: Option<i64>,
    cache_read: Option<i64>,
    cache_write: Option<i64>,
    total: Option<i64>,
}

fn usage_fields(data: &Value) -> UsageFields {
    let usage = data.get("usage").unwrap_or(&Value::Null);
    UsageFields {
        input: usage.get("input").and_then(Value::as_i64),
        output: usage.get("output").and_then(Value::as_i64),
        cache_read: usage.get("cacheRead").and_then(Value::as_i64),
        cache_write: usage.get("cacheWrite").and_then(Value::as_i64),
        total: usage.get("total").and_then(Value::as_i64),
    }
}

fn error_message(event: &TelemetryEvent) -> Option<String> {
    event.error.as_ref().map(|e| e.message.clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// `run.start` — create the run row. `INSERT OR IGNORE` keeps at most one
/// row per run id even if a duplicate start slips through with a new event
/// id.
fn project_run_start(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let Some(run_id) = event.run_id.as_deref() else {
        return Ok(());
    };
    let _ = conn.execute(
        "INSERT OR IGNORE INTO runs
           (run_id, session_key, agent_id, provider, model, started_at,
            is_heartbeat, origin_channel)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run_id,
            event.session_key,
            event.agent_id,
            str_field(&event.data, "provider"),
            str_field(&event.data, "model"),
            event.ts,
            bool_field(&event.data, "isHeartbeat").map(i64::from),
            str_field(&event.data, "originChannel"),
        ],
    )?;
    Ok(())
}

/// `run.end` — finalize the run row. An end for an unknown run id updates
/// zero rows and is deliberately silent.
fn project_run_end(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let Some(run_id) = event.run_id.as_deref() else {
        return Ok(());
    };
    let usage = usage_fields(&event.data);
    let _ = conn.execute(
        "UPDATE runs SET
           ended_at           = ?2,
           duration_ms        = COALESCE(?3, ?2 - started_at),
           stop_reason        = COALESCE(?4, stop_reason),
           model              = COALESCE(?5, model),
           tool_call_count    = COALESCE(?6, tool_call_count),
           compaction_count   = COALESCE(?7, compaction_count),
           input_tokens       = COALESCE(?8, input_tokens),
           output_tokens      = COALESCE(?9, output_tokens),
           cache_read_tokens  = COALESCE(?10, cache_read_tokens),
           cache_write_tokens = COALESCE(?11, cache_write_tokens),
           total_tokens       = COALESCE(?12, total_tokens),
           error              = COALESCE(?13, error)
         WHERE run_id = ?1",
        params![
            run_id,
            event.ts,
            i64_field(&event.data, "durationMs"),
            str_field(&event.data, "stopReason"),
            str_field(&event.data, "model"),
            i64_field(&event.data, "toolCallCount"),
            i64_field(&event.data, "compactionCount"),
            usage.input,
            usage.output,
            usage.cache_read,
            usage.cache_write,
            usage.total,
            error_message(event),
        ],
    )?;
    Ok(())
}

/// `tool.start` — open a tool-call row with a fresh surrogate id.
fn project_tool_start(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO tool_calls
           (id, run_id, session_key, tool_name, tool_call_id, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            fresh_tool_call_row_id(),
            event.run_id,
            event.session_key,
            str_field(&event.data, "toolName"),
            str_field(&event.data, "toolCallId"),
            event.ts,
        ],
    )?;
    Ok(())
}

/// `tool.end` — close the most recent open row sharing this `toolCallId`.
/// When no open row matches (lost start, replay from a partial log), insert
/// a standalone row so the completion is never dropped.
fn project_tool_end(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let tool_call_id = str_field(&event.data, "toolCallId");
    let duration_ms = i64_field(&event.data, "durationMs");
    let is_error =
        bool_field(&event.data, "isError").unwrap_or_else(|| event.error.is_some());
    let error = error_message(event);
    let file_path = str_field(&event.data, "filePath");
    let exec_command = str_field(&event.data, "execCommand");

    let updated = match tool_call_id.as_deref() {
        Some(call_id) => conn.execute(
            "UPDATE tool_calls SET
               ended_at     = ?2,
               duration_ms  = COALESCE(?3, ?2 - started_at),
               is_error     = ?4,
               error        = ?5,
               file_path    = COALESCE(?6, file_path),
               exec_command = COALESCE(?7, exec_command)
             WHERE id = (
               SELECT id FROM tool_calls
               WHERE tool_call_id = ?1 AND ended_at IS NULL
               ORDER BY started_at DESC, id DESC
               LIMIT 1
             )",
            params![
                call_id,
                event.ts,
                duration_ms,
                i64::from(is_error),
                error,
                file_path,
                exec_command,
            ],
        )?,
        None => 0,
    };

    if updated == 0 {
        let _ = conn.execute(
            "INSERT INTO tool_calls
               (id, run_id, session_key, tool_name, tool_call_id,
                ended_at, duration_ms, is_error, error, file_path, exec_command)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                fresh_tool_call_row_id(),
                event.run_id,
                event.session_key,
                str_field(&event.data, "toolName"),
                tool_call_id,
                event.ts,
                duration_ms,
                i64::from(is_error),
                error,
                file_path,
                exec_command,
            ],
        )?;
    }
    Ok(())
}

/// `message.inbound` / `message.outbound` — direction comes from the kind
/// tag, never the payload.
fn project_message(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let direction = match event.kind() {
        Some(EventKind::MessageInbound) => "inbound",
        Some(EventKind::MessageOutbound) => "outbound",
        _ => return Ok(()),
    };
    let _ = conn.execute(
        "INSERT OR IGNORE INTO messages
           (id, session_key, run_id, direction, channel, from_id, content_preview, ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.id,
            event.session_key,
            event.run_id,
            direction,
            str_field(&event.data, "channel"),
            str_field(&event.data, "from"),
            str_field(&event.data, "contentPreview"),
            event.ts,
        ],
    )?;
    Ok(())
}

/// `subagent.spawn` — open a subagent row keyed by the spawn event id.
fn project_subagent_spawn(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let _ = conn.execute(
        "INSERT OR IGNORE INTO subagents
           (id, run_id, parent_session_key, child_session_key, agent_id,
            task, label, model, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id,
            event.run_id,
            event.session_key,
            str_field(&event.data, "childSessionKey"),
            str_field(&event.data, "agentId").or_else(|| event.agent_id.clone()),
            str_field(&event.data, "task"),
            str_field(&event.data, "label"),
            str_field(&event.data, "model"),
            event.ts,
        ],
    )?;
    Ok(())
}

/// `subagent.end` — close the most recent open row for this child session.
/// No matching spawn is a silent no-op.
fn project_subagent_end(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let Some(child) = str_field(&event.data, "childSessionKey") else {
        return Ok(());
    };
    let outcome = str_field(&event.data, "outcome")
        .or_else(|| error_message(event).map(|_| "error".to_owned()));
    let _ = conn.execute(
        "UPDATE subagents SET
           ended_at    = ?2,
           duration_ms = COALESCE(?3, ?2 - started_at),
           outcome     = COALESCE(?4, outcome)
         WHERE id = (
           SELECT id FROM subagents
           WHERE child_session_key = ?1 AND ended_at IS NULL
           ORDER BY started_at DESC, id DESC
           LIMIT 1
         )",
        params![
            child,
            event.ts,
            i64_field(&event.data, "durationMs"),
            outcome,
        ],
    )?;
    Ok(())
}

/// `llm.call` — one accounting row per event id.
fn project_llm_call(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let _ = conn.execute(
        "INSERT OR IGNORE INTO model_calls
           (id, run_id, session_key, call_index, provider, model,
            input_tokens, output_tokens, total_tokens, cost_usd, duration_ms, ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            event.id,
            event.run_id,
            event.session_key,
            i64_field(&event.data, "callIndex"),
            str_field(&event.data, "provider"),
            str_field(&event.data, "model"),
            i64_field(&event.data, "inputTokens"),
            i64_field(&event.data, "outputTokens"),
            i64_field(&event.data, "totalTokens"),
            f64_field(&event.data, "costUsd"),
            i64_field(&event.data, "durationMs"),
            event.ts,
        ],
    )?;
    Ok(())
}

/// `usage.snapshot` — record one accounting row keyed by the event id and
/// refresh the run's token counters in place. Snapshots arrive mid-run; a
/// later `run.end` with usage still wins via COALESCE there.
fn project_usage_snapshot(conn: &Connection, event: &TelemetryEvent) -> Result<()> {
    let Some(run_id) = event.run_id.as_deref() else {
        return Ok(());
    };
    let usage = usage_fields(&event.data);
    let _ = conn.execute(
        "INSERT OR IGNORE INTO model_calls
           (id, run_id, session_key, call_index, provider, model,
            input_tokens, output_tokens, total_tokens, cost_usd, duration_ms, ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            event.id,
            run_id,
            event.session_key,
            i64_field(&event.data, "callIndex"),
            str_field(&event.data, "provider"),
            str_field(&event.data, "model"),
            usage.input,
            usage.output,
            usage.total,
            f64_field(&event.data, "costUsd"),
            i64_field(&event.data, "durationMs"),
            event.ts,
        ],
    )?;
    let _ = conn.execute(
        "UPDATE runs SET
           input_tokens       = COALESCE(?2, input_tokens),
           output_tokens      = COALESCE(?3, output_tokens),
           cache_read_tokens  = COALESCE(?4, cache_read_tokens),
           cache_write_tokens = COALESCE(?5, cache_write_tokens),
           total_tokens       = COALESCE(?6, total_tokens),
           model              = COALESCE(?7, model),
           provider           = COALESCE(?8, provider)
         WHERE run_id = ?1",
        params![
            run_id,
            usage.input,
            usage.output,
            usage.cache_read,
            usage.cache_write,
            usage.total,
            str_field(&event.data, "model"),
            str_field(&event.data, "provider"),
        ],
    )?;
    Ok(())
}

fn fresh_tool_call_row_id() -> String {
    format!("tc_{}", Uuid::now_v7())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
