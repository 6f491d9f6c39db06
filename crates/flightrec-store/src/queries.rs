//! Read-only queries over the projection tables.
//!
//! Stateless functions taking a `&Connection`; [`crate::QueryApi`] wraps
//! them behind the pool. Filters build SQL dynamically with numbered
//! positional parameters so every combination of optional filters shares
//! one code path.

use std::fmt::Write as _;

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use crate::errors::Result;

/// Default row cap for run listings.
pub const DEFAULT_RUNS_LIMIT: u32 = 50;
/// Default row cap for tool-call listings.
pub const DEFAULT_TOOL_CALLS_LIMIT: u32 = 100;
/// Default row cap for session timelines.
pub const DEFAULT_TIMELINE_LIMIT: u32 = 500;
/// Default row cap for raw event listings.
pub const DEFAULT_EVENTS_LIMIT: u32 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────────────────────────────────────

/// One agent run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRow {
    /// Run identifier.
    pub run_id: String,
    pub session_key: Option<String>,
    pub agent_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub stop_reason: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cache_write_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub tool_call_count: Option<i64>,
    pub compaction_count: Option<i64>,
    pub is_heartbeat: Option<bool>,
    pub origin_channel: Option<String>,
    pub error: Option<String>,
}

/// One tool invocation (paired or orphaned).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRow {
    /// Surrogate row id.
    pub id: String,
    pub run_id: Option<String>,
    pub session_key: Option<String>,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub is_error: Option<bool>,
    pub error: Option<String>,
    pub file_path: Option<String>,
    pub exec_command: Option<String>,
}

/// One accounted LLM API call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCallRow {
    /// Owning event id.
    pub id: String,
    pub run_id: Option<String>,
    pub session_key: Option<String>,
    pub call_index: Option<i64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<i64>,
    pub ts: Option<i64>,
}

/// One inbound/outbound message.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    /// Owning event id.
    pub id: String,
    pub session_key: Option<String>,
    pub run_id: Option<String>,
    pub direction: String,
    pub channel: Option<String>,
    #[serde(rename = "from")]
    pub from_id: Option<String>,
    pub content_preview: Option<String>,
    pub ts: i64,
}

/// One sub-agent spawn (with its end, when seen).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentRow {
    /// Spawn event id.
    pub id: String,
    pub run_id: Option<String>,
    pub parent_session_key: Option<String>,
    pub child_session_key: Option<String>,
    pub agent_id: Option<String>,
    pub task: Option<String>,
    pub label: Option<String>,
    pub model: Option<String>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub outcome: Option<String>,
}

/// One raw event, payload re-hydrated to JSON.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    /// Event id.
    pub id: String,
    pub kind: String,
    pub ts: i64,
    pub seq: i64,
    pub agent_id: Option<String>,
    pub session_key: Option<String>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub source: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_refs: Option<Value>,
}

/// A run with its nested tool and model calls.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetail {
    /// The run row itself.
    #[serde(flatten)]
    pub run: RunRow,
    /// Tool calls attributed to the run, oldest first.
    pub tool_calls: Vec<ToolCallRow>,
    /// Model calls attributed to the run, in call order.
    pub model_calls: Vec<ModelCallRow>,
}

/// Aggregated token/cost totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    /// Runs contributing to the totals.
    pub run_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub total_tokens: i64,
    pub tool_call_count: i64,
    /// Estimated spend, summed from model-call accounting.
    pub cost_usd: f64,
}

/// One session with aggregate stats over its runs.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    /// Routing key of the session.
    pub session_key: String,
    pub agent_id: Option<String>,
    pub run_count: i64,
    pub first_run_at: Option<i64>,
    pub last_activity_at: Option<i64>,
    pub total_tokens: i64,
    pub tool_call_count: i64,
    pub total_duration_ms: i64,
    pub error_count: i64,
    pub total_cost_usd: f64,
}

/// One cost-breakdown bucket.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdownRow {
    /// Value of the grouping dimension (`"unknown"` when NULL).
    pub group_key: String,
    pub call_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
}

/// One error surfaced from a run or a tool call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRow {
    /// `"run"` or `"tool"`.
    pub origin: String,
    /// Row id on the origin table.
    pub id: String,
    pub session_key: Option<String>,
    pub run_id: Option<String>,
    pub message: String,
    pub ts: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter options
// ─────────────────────────────────────────────────────────────────────────────

/// Filters for [`list_runs`].
#[derive(Clone, Debug, Default)]
pub struct ListRunsOptions {
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Restrict to one model.
    pub model: Option<String>,
    /// Only runs started at or after this epoch-ms timestamp.
    pub since: Option<i64>,
    /// Only runs started at or before this epoch-ms timestamp.
    pub until: Option<i64>,
    /// Row cap; defaults to [`DEFAULT_RUNS_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`get_tool_calls`].
#[derive(Clone, Debug, Default)]
pub struct ToolCallOptions {
    /// Restrict to one run.
    pub run_id: Option<String>,
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// Restrict to runs owned by one agent.
    pub agent_id: Option<String>,
    /// Restrict to one tool name.
    pub tool_name: Option<String>,
    /// Only calls that ended in error.
    pub errors_only: bool,
    /// Row cap; defaults to [`DEFAULT_TOOL_CALLS_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`get_session_timeline`].
#[derive(Clone, Debug, Default)]
pub struct TimelineOptions {
    /// Restrict to these kind tags; `None` or empty means all kinds.
    pub kinds: Option<Vec<String>>,
    /// Row cap; defaults to [`DEFAULT_TIMELINE_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`get_usage_summary`].
#[derive(Clone, Debug, Default)]
pub struct UsageSummaryOptions {
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// Restrict run totals to one agent.
    pub agent_id: Option<String>,
    /// Only runs started at or after this epoch-ms timestamp.
    pub since: Option<i64>,
    /// Only runs started at or before this epoch-ms timestamp.
    pub until: Option<i64>,
}

/// Filters for [`list_events`].
#[derive(Clone, Debug, Default)]
pub struct ListEventsOptions {
    /// Restrict to one kind tag.
    pub kind: Option<String>,
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// Restrict to one run.
    pub run_id: Option<String>,
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Only events at or after this epoch-ms timestamp.
    pub since: Option<i64>,
    /// Only events at or before this epoch-ms timestamp.
    pub until: Option<i64>,
    /// Row cap; defaults to [`DEFAULT_EVENTS_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`get_file_operations`].
#[derive(Clone, Debug, Default)]
pub struct FileOperationsOptions {
    /// Substring match against the touched path.
    pub path_contains: Option<String>,
    /// Restrict to one run.
    pub run_id: Option<String>,
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// Restrict to runs owned by one agent.
    pub agent_id: Option<String>,
    /// Row cap; defaults to [`DEFAULT_TOOL_CALLS_LIMIT`].
    pub limit: Option<u32>,
}

/// Grouping dimension for [`get_cost_breakdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CostGroupBy {
    /// Group by model name.
    #[default]
    Model,
    /// Group by provider.
    Provider,
    /// Group by session key.
    Session,
    /// Group by UTC calendar day of the call.
    Day,
    /// Group by owning run's agent id.
    Agent,
}

/// Filters for [`list_sessions`].
#[derive(Clone, Debug, Default)]
pub struct ListSessionsOptions {
    /// Restrict to sessions with runs owned by one agent.
    pub agent_id: Option<String>,
    /// Only sessions with runs started at or after this epoch-ms timestamp.
    pub since: Option<i64>,
    /// Only sessions with runs started at or before this epoch-ms timestamp.
    pub until: Option<i64>,
    /// Row cap; defaults to [`DEFAULT_RUNS_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`get_cost_breakdown`].
#[derive(Clone, Debug, Default)]
pub struct CostBreakdownOptions {
    /// Dimension the totals are bucketed by.
    pub group_by: CostGroupBy,
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// Restrict to calls made by runs of one agent.
    pub agent_id: Option<String>,
    /// Only calls at or after this epoch-ms timestamp.
    pub since: Option<i64>,
    /// Only calls at or before this epoch-ms timestamp.
    pub until: Option<i64>,
    /// Row cap; defaults to [`DEFAULT_RUNS_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`list_messages`].
#[derive(Clone, Debug, Default)]
pub struct ListMessagesOptions {
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// `"inbound"` or `"outbound"`.
    pub direction: Option<String>,
    /// Row cap; defaults to [`DEFAULT_EVENTS_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`list_subagents`].
#[derive(Clone, Debug, Default)]
pub struct ListSubagentsOptions {
    /// Restrict to children of one parent session.
    pub parent_session_key: Option<String>,
    /// Row cap; defaults to [`DEFAULT_EVENTS_LIMIT`].
    pub limit: Option<u32>,
}

/// Filters for [`list_errors`].
#[derive(Clone, Debug, Default)]
pub struct ListErrorsOptions {
    /// Restrict to one session.
    pub session_key: Option<String>,
    /// Row cap; defaults to [`DEFAULT_EVENTS_LIMIT`].
    pub limit: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// List runs, most recent first.
pub fn list_runs(conn: &Connection, options: &ListRunsOptions) -> Result<Vec<RunRow>> {
    let mut sql = String::from("SELECT * FROM runs WHERE 1=1");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(session_key) = &options.session_key {
        let _ = write!(sql, " AND session_key = ?{}", params.len() + 1);
        params.push(Box::new(session_key.clone()));
    }
    if let Some(agent_id) = &options.agent_id {
        let _ = write!(sql, " AND agent_id = ?{}", params.len() + 1);
        params.push(Box::new(agent_id.clone()));
    }
    if let Some(model) = &options.model {
        let _ = write!(sql, " AND model = ?{}", params.len() + 1);
        params.push(Box::new(model.clone()));
    }
    if let Some(since) = options.since {
        let _ = write!(sql, " AND started_at >= ?{}", params.len() + 1);
        params.push(Box::new(since));
    }
    if let Some(until) = options.until {
        let _ = write!(sql, " AND started_at <= ?{}", params.len() + 1);
        params.push(Box::new(until));
    }
    let _ = write!(
        sql,
        " ORDER BY started_at DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_RUNS_LIMIT)
    );

    collect(conn, &sql, &params, run_from_row)
}

/// Fetch one run with its nested tool and model calls. `None` when the run
/// id is unknown.
pub fn get_run(conn: &Connection, run_id: &str) -> Result<Option<RunDetail>> {
    let run = conn
        .query_row(
            "SELECT * FROM runs WHERE run_id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?;
    let Some(run) = run else {
        return Ok(None);
    };

    let tool_calls = collect(
        conn,
        "SELECT * FROM tool_calls WHERE run_id = ?1 ORDER BY started_at ASC, id ASC",
        &[Box::new(run_id.to_owned()) as Box<dyn ToSql>],
        tool_call_from_row,
    )?;
    let model_calls = collect(
        conn,
        "SELECT * FROM model_calls WHERE run_id = ?1 ORDER BY call_index ASC, ts ASC",
        &[Box::new(run_id.to_owned()) as Box<dyn ToSql>],
        model_call_from_row,
    )?;

    Ok(Some(RunDetail {
        run,
        tool_calls,
        model_calls,
    }))
}

/// List tool calls, oldest first.
pub fn get_tool_calls(conn: &Connection, options: &ToolCallOptions) -> Result<Vec<ToolCallRow>> {
    let mut sql = String::from("SELECT * FROM tool_calls WHERE 1=1");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(run_id) = &options.run_id {
        let _ = write!(sql, " AND run_id = ?{}", params.len() + 1);
        params.push(Box::new(run_id.clone()));
    }
    if let Some(session_key) = &options.session_key {
        let _ = write!(sql, " AND session_key = ?{}", params.len() + 1);
        params.push(Box::new(session_key.clone()));
    }
    // tool_calls has no agent column; attribution goes through runs.
    if let Some(agent_id) = &options.agent_id {
        let _ = write!(
            sql,
            " AND run_id IN (SELECT run_id FROM runs WHERE agent_id = ?{})",
            params.len() + 1
        );
        params.push(Box::new(agent_id.clone()));
    }
    if let Some(tool_name) = &options.tool_name {
        let _ = write!(sql, " AND tool_name = ?{}", params.len() + 1);
        params.push(Box::new(tool_name.clone()));
    }
    if options.errors_only {
        sql.push_str(" AND is_error = 1");
    }
    let _ = write!(
        sql,
        " ORDER BY started_at ASC, id ASC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_TOOL_CALLS_LIMIT)
    );

    collect(conn, &sql, &params, tool_call_from_row)
}

/// Chronological raw-event timeline for one session.
pub fn get_session_timeline(
    conn: &Connection,
    session_key: &str,
    options: &TimelineOptions,
) -> Result<Vec<EventRow>> {
    let mut sql = String::from("SELECT * FROM events WHERE session_key = ?1");
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(session_key.to_owned())];

    if let Some(kinds) = options.kinds.as_deref().filter(|k| !k.is_empty()) {
        sql.push_str(" AND kind IN (");
        for (i, kind) in kinds.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            let _ = write!(sql, "?{}", params.len() + 1);
            params.push(Box::new(kind.clone()));
        }
        sql.push(')');
    }
    let _ = write!(
        sql,
        " ORDER BY ts ASC, rowid ASC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_TIMELINE_LIMIT)
    );

    collect(conn, &sql, &params, event_from_row)
}

/// Aggregate token totals from runs and estimated cost from model calls.
///
/// Run totals honor all four filters; the cost leg is scoped by session and
/// time window only, since `model_calls` carries no agent column.
pub fn get_usage_summary(conn: &Connection, options: &UsageSummaryOptions) -> Result<UsageSummary> {
    let mut runs_sql = String::from(
        "SELECT COUNT(*),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(SUM(cache_read_tokens), 0),
                COALESCE(SUM(cache_write_tokens), 0),
                COALESCE(SUM(total_tokens), 0),
                COALESCE(SUM(tool_call_count), 0)
         FROM runs WHERE 1=1",
    );
    let mut runs_params: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(session_key) = &options.session_key {
        let _ = write!(runs_sql, " AND session_key = ?{}", runs_params.len() + 1);
        runs_params.push(Box::new(session_key.clone()));
    }
    if let Some(agent_id) = &options.agent_id {
        let _ = write!(runs_sql, " AND agent_id = ?{}", runs_params.len() + 1);
        runs_params.push(Box::new(agent_id.clone()));
    }
    if let Some(since) = options.since {
        let _ = write!(runs_sql, " AND started_at >= ?{}", runs_params.len() + 1);
        runs_params.push(Box::new(since));
    }
    if let Some(until) = options.until {
        let _ = write!(runs_sql, " AND started_at <= ?{}", runs_params.len() + 1);
        runs_params.push(Box::new(until));
    }
    let run_refs: Vec<&dyn ToSql> = runs_params.iter().map(AsRef::as_ref).collect();
    let mut summary = conn.query_row(&runs_sql, run_refs.as_slice(), |row| {
        Ok(UsageSummary {
            run_count: row.get(0)?,
            input_tokens: row.get(1)?,
            output_tokens: row.get(2)?,
            cache_read_tokens: row.get(3)?,
            cache_write_tokens: row.get(4)?,
            total_tokens: row.get(5)?,
            tool_call_count: row.get(6)?,
            cost_usd: 0.0,
        })
    })?;

    let mut cost_sql =
        String::from("SELECT COALESCE(SUM(cost_usd), 0.0) FROM model_calls WHERE 1=1");
    let mut cost_params: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(session_key) = &options.session_key {
        let _ = write!(cost_sql, " AND session_key = ?{}", cost_params.len() + 1);
        cost_params.push(Box::new(session_key.clone()));
    }
    if let Some(since) = options.since {
        let _ = write!(cost_sql, " AND ts >= ?{}", cost_params.len() + 1);
        cost_params.push(Box::new(since));
    }
    if let Some(until) = options.until {
        let _ = write!(cost_sql, " AND ts <= ?{}", cost_params.len() + 1);
        cost_params.push(Box::new(until));
    }
    let cost_refs: Vec<&dyn ToSql> = cost_params.iter().map(AsRef::as_ref).collect();
    summary.cost_usd = conn.query_row(&cost_sql, cost_refs.as_slice(), |row| row.get(0))?;

    Ok(summary)
}

/// List raw events, most recent first.
pub fn list_events(conn: &Connection, options: &ListEventsOptions) -> Result<Vec<EventRow>> {
    let mut sql = String::from("SELECT * FROM events WHERE 1=1");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(kind) = &options.kind {
        let _ = write!(sql, " AND kind = ?{}", params.len() + 1);
        params.push(Box::new(kind.clone()));
    }
    if let Some(session_key) = &options.session_key {
        let _ = write!(sql, " AND session_key = ?{}", params.len() + 1);
        params.push(Box::new(session_key.clone()));
    }
    if let Some(run_id) = &options.run_id {
        let _ = write!(sql, " AND run_id = ?{}", params.len() + 1);
        params.push(Box::new(run_id.clone()));
    }
    if let Some(agent_id) = &options.agent_id {
        let _ = write!(sql, " AND agent_id = ?{}", params.len() + 1);
        params.push(Box::new(agent_id.clone()));
    }
    if let Some(since) = options.since {
        let _ = write!(sql, " AND ts >= ?{}", params.len() + 1);
        params.push(Box::new(since));
    }
    if let Some(until) = options.until {
        let _ = write!(sql, " AND ts <= ?{}", params.len() + 1);
        params.push(Box::new(until));
    }
    let _ = write!(
        sql,
        " ORDER BY ts DESC, rowid DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_EVENTS_LIMIT)
    );

    collect(conn, &sql, &params, event_from_row)
}

/// Tool calls that touched a file, newest first.
pub fn get_file_operations(
    conn: &Connection,
    options: &FileOperationsOptions,
) -> Result<Vec<ToolCallRow>> {
    let mut sql = String::from("SELECT * FROM tool_calls WHERE file_path IS NOT NULL");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(fragment) = &options.path_contains {
        let _ = write!(sql, " AND file_path LIKE ?{}", params.len() + 1);
        params.push(Box::new(format!("%{fragment}%")));
    }
    if let Some(run_id) = &options.run_id {
        let _ = write!(sql, " AND run_id = ?{}", params.len() + 1);
        params.push(Box::new(run_id.clone()));
    }
    if let Some(session_key) = &options.session_key {
        let _ = write!(sql, " AND session_key = ?{}", params.len() + 1);
        params.push(Box::new(session_key.clone()));
    }
    if let Some(agent_id) = &options.agent_id {
        let _ = write!(
            sql,
            " AND run_id IN (SELECT run_id FROM runs WHERE agent_id = ?{})",
            params.len() + 1
        );
        params.push(Box::new(agent_id.clone()));
    }
    let _ = write!(
        sql,
        " ORDER BY started_at DESC, id DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_TOOL_CALLS_LIMIT)
    );

    collect(conn, &sql, &params, tool_call_from_row)
}

/// Model-call accounting rows for one run, in call order.
pub fn get_model_calls(conn: &Connection, run_id: &str) -> Result<Vec<ModelCallRow>> {
    collect(
        conn,
        "SELECT * FROM model_calls WHERE run_id = ?1 ORDER BY call_index ASC, ts ASC",
        &[Box::new(run_id.to_owned()) as Box<dyn ToSql>],
        model_call_from_row,
    )
}

/// Sessions with per-session aggregates, most recently active first.
pub fn list_sessions(conn: &Connection, options: &ListSessionsOptions) -> Result<Vec<SessionRow>> {
    let mut sql = String::from(
        "SELECT r.session_key,
                MAX(r.agent_id) AS agent_id,
                COUNT(*) AS run_count,
                MIN(r.started_at) AS first_run_at,
                MAX(COALESCE(r.ended_at, r.started_at)) AS last_activity_at,
                COALESCE(SUM(r.total_tokens), 0) AS total_tokens,
                COALESCE(SUM(r.tool_call_count), 0) AS tool_call_count,
                COALESCE(SUM(r.duration_ms), 0) AS total_duration_ms,
                SUM(CASE WHEN r.error IS NOT NULL THEN 1 ELSE 0 END) AS error_count,
                COALESCE((SELECT SUM(mc.cost_usd) FROM model_calls mc
                           WHERE mc.session_key = r.session_key), 0.0) AS total_cost_usd
         FROM runs r WHERE r.session_key IS NOT NULL",
    );
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(agent_id) = &options.agent_id {
        let _ = write!(sql, " AND r.agent_id = ?{}", params.len() + 1);
        params.push(Box::new(agent_id.clone()));
    }
    if let Some(since) = options.since {
        let _ = write!(sql, " AND r.started_at >= ?{}", params.len() + 1);
        params.push(Box::new(since));
    }
    if let Some(until) = options.until {
        let _ = write!(sql, " AND r.started_at <= ?{}", params.len() + 1);
        params.push(Box::new(until));
    }
    let _ = write!(
        sql,
        " GROUP BY r.session_key ORDER BY last_activity_at DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_RUNS_LIMIT)
    );

    collect(conn, &sql, &params, |row| {
        Ok(SessionRow {
            session_key: row.get("session_key")?,
            agent_id: row.get("agent_id")?,
            run_count: row.get("run_count")?,
            first_run_at: row.get("first_run_at")?,
            last_activity_at: row.get("last_activity_at")?,
            total_tokens: row.get("total_tokens")?,
            tool_call_count: row.get("tool_call_count")?,
            total_duration_ms: row.get("total_duration_ms")?,
            error_count: row.get("error_count")?,
            total_cost_usd: row.get("total_cost_usd")?,
        })
    })
}

/// Model-call spend bucketed by one dimension, most expensive bucket first.
pub fn get_cost_breakdown(
    conn: &Connection,
    options: &CostBreakdownOptions,
) -> Result<Vec<CostBreakdownRow>> {
    let group_expr = match options.group_by {
        CostGroupBy::Model => "COALESCE(mc.model, 'unknown')",
        CostGroupBy::Provider => "COALESCE(mc.provider, 'unknown')",
        CostGroupBy::Session => "COALESCE(mc.session_key, 'unknown')",
        CostGroupBy::Day => "COALESCE(date(mc.ts / 1000, 'unixepoch'), 'unknown')",
        CostGroupBy::Agent => "COALESCE(r.agent_id, 'unknown')",
    };
    // The runs join is only needed when the agent dimension is in play.
    let needs_runs = options.group_by == CostGroupBy::Agent || options.agent_id.is_some();

    let mut sql = format!(
        "SELECT {group_expr} AS group_key,
                COUNT(*) AS call_count,
                COALESCE(SUM(mc.input_tokens), 0) AS input_tokens,
                COALESCE(SUM(mc.output_tokens), 0) AS output_tokens,
                COALESCE(SUM(mc.total_tokens), 0) AS total_tokens,
                COALESCE(SUM(mc.cost_usd), 0.0) AS total_cost_usd
         FROM model_calls mc{}
         WHERE 1=1",
        if needs_runs {
            " JOIN runs r ON r.run_id = mc.run_id"
        } else {
            ""
        }
    );
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(session_key) = &options.session_key {
        let _ = write!(sql, " AND mc.session_key = ?{}", params.len() + 1);
        params.push(Box::new(session_key.clone()));
    }
    if let Some(agent_id) = &options.agent_id {
        let _ = write!(sql, " AND r.agent_id = ?{}", params.len() + 1);
        params.push(Box::new(agent_id.clone()));
    }
    if let Some(since) = options.since {
        let _ = write!(sql, " AND mc.ts >= ?{}", params.len() + 1);
        params.push(Box::new(since));
    }
    if let Some(until) = options.until {
        let _ = write!(sql, " AND mc.ts <= ?{}", params.len() + 1);
        params.push(Box::new(until));
    }
    let _ = write!(
        sql,
        " GROUP BY group_key ORDER BY total_cost_usd DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_RUNS_LIMIT)
    );

    collect(conn, &sql, &params, |row| {
        Ok(CostBreakdownRow {
            group_key: row.get("group_key")?,
            call_count: row.get("call_count")?,
            input_tokens: row.get("input_tokens")?,
            output_tokens: row.get("output_tokens")?,
            total_tokens: row.get("total_tokens")?,
            total_cost_usd: row.get("total_cost_usd")?,
        })
    })
}

/// List messages, most recent first.
pub fn list_messages(conn: &Connection, options: &ListMessagesOptions) -> Result<Vec<MessageRow>> {
    let mut sql = String::from("SELECT * FROM messages WHERE 1=1");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(session_key) = &options.session_key {
        let _ = write!(sql, " AND session_key = ?{}", params.len() + 1);
        params.push(Box::new(session_key.clone()));
    }
    if let Some(direction) = &options.direction {
        let _ = write!(sql, " AND direction = ?{}", params.len() + 1);
        params.push(Box::new(direction.clone()));
    }
    let _ = write!(
        sql,
        " ORDER BY ts DESC, id DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_EVENTS_LIMIT)
    );

    collect(conn, &sql, &params, message_from_row)
}

/// List sub-agent spawns, most recent first.
pub fn list_subagents(
    conn: &Connection,
    options: &ListSubagentsOptions,
) -> Result<Vec<SubagentRow>> {
    let mut sql = String::from("SELECT * FROM subagents WHERE 1=1");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(parent) = &options.parent_session_key {
        let _ = write!(sql, " AND parent_session_key = ?{}", params.len() + 1);
        params.push(Box::new(parent.clone()));
    }
    let _ = write!(
        sql,
        " ORDER BY started_at DESC, id DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_EVENTS_LIMIT)
    );

    collect(conn, &sql, &params, subagent_from_row)
}

/// Errors from runs and tool calls combined, newest first.
pub fn list_errors(conn: &Connection, options: &ListErrorsOptions) -> Result<Vec<ErrorRow>> {
    let (run_filter, tool_filter) = match options.session_key {
        Some(_) => (" AND session_key = ?1", " AND session_key = ?1"),
        None => ("", ""),
    };
    let sql = format!(
        "SELECT 'run' AS origin, run_id AS id, session_key, run_id, error, ended_at AS ts
           FROM runs WHERE error IS NOT NULL{run_filter}
         UNION ALL
         SELECT 'tool' AS origin, id, session_key, run_id, error, ended_at AS ts
           FROM tool_calls WHERE error IS NOT NULL{tool_filter}
         ORDER BY ts DESC LIMIT {}",
        options.limit.unwrap_or(DEFAULT_EVENTS_LIMIT)
    );

    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(key) = &options.session_key {
        params.push(Box::new(key.clone()));
    }

    collect(conn, &sql, &params, |row| {
        Ok(ErrorRow {
            origin: row.get("origin")?,
            id: row.get("id")?,
            session_key: row.get("session_key")?,
            run_id: row.get("run_id")?,
            message: row.get("error")?,
            ts: row.get("ts")?,
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn collect<T>(
    conn: &Connection,
    sql: &str,
    params: &[Box<dyn ToSql>],
    map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), map)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get("run_id")?,
        session_key: row.get("session_key")?,
        agent_id: row.get("agent_id")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_ms: row.get("duration_ms")?,
        stop_reason: row.get("stop_reason")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        cache_read_tokens: row.get("cache_read_tokens")?,
        cache_write_tokens: row.get("cache_write_tokens")?,
        total_tokens: row.get("total_tokens")?,
        tool_call_count: row.get("tool_call_count")?,
        compaction_count: row.get("compaction_count")?,
        is_heartbeat: row
            .get::<_, Option<i64>>("is_heartbeat")?
            .map(|v| v != 0),
        origin_channel: row.get("origin_channel")?,
        error: row.get("error")?,
    })
}

fn tool_call_from_row(row: &Row<'_>) -> rusqlite::Result<ToolCallRow> {
    Ok(ToolCallRow {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        session_key: row.get("session_key")?,
        tool_name: row.get("tool_name")?,
        tool_call_id: row.get("tool_call_id")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_ms: row.get("duration_ms")?,
        is_error: row.get::<_, Option<i64>>("is_error")?.map(|v| v != 0),
        error: row.get("error")?,
        file_path: row.get("file_path")?,
        exec_command: row.get("exec_command")?,
    })
}

fn model_call_from_row(row: &Row<'_>) -> rusqlite::Result<ModelCallRow> {
    Ok(ModelCallRow {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        session_key: row.get("session_key")?,
        call_index: row.get("call_index")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        total_tokens: row.get("total_tokens")?,
        cost_usd: row.get("cost_usd")?,
        duration_ms: row.get("duration_ms")?,
        ts: row.get("ts")?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get("id")?,
        session_key: row.get("session_key")?,
        run_id: row.get("run_id")?,
        direction: row.get("direction")?,
        channel: row.get("channel")?,
        from_id: row.get("from_id")?,
        content_preview: row.get("content_preview")?,
        ts: row.get("ts")?,
    })
}

fn subagent_from_row(row: &Row<'_>) -> rusqlite::Result<SubagentRow> {
    Ok(SubagentRow {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        parent_session_key: row.get("parent_session_key")?,
        child_session_key: row.get("child_session_key")?,
        agent_id: row.get("agent_id")?,
        task: row.get("task")?,
        label: row.get("label")?,
        model: row.get("model")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_ms: row.get("duration_ms")?,
        outcome: row.get("outcome")?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    let data: String = row.get("data")?;
    let error: Option<String> = row.get("error")?;
    let blob_refs: Option<String> = row.get("blob_refs")?;
    Ok(EventRow {
        id: row.get("id")?,
        kind: row.get("kind")?,
        ts: row.get("ts")?,
        seq: row.get("seq")?,
        agent_id: row.get("agent_id")?,
        session_key: row.get("session_key")?,
        session_id: row.get("session_id")?,
        run_id: row.get("run_id")?,
        source: row.get("source")?,
        data: serde_json::from_str(&data).unwrap_or(Value::Null),
        error: error.and_then(|raw| serde_json::from_str(&raw).ok()),
        blob_refs: blob_refs.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use crate::sqlite::open_memory_pool;
    use flightrec_core::{ErrorInfo, EventKind, EventSource, TelemetryEvent};
    use serde_json::json;

    struct Fixture {
        indexer: Indexer,
        next_ts: i64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                indexer: Indexer::new(open_memory_pool().unwrap()).unwrap(),
                next_ts: 0,
            }
        }

        fn conn(&self) -> crate::sqlite::PooledConnection {
            self.indexer.pool().get().unwrap()
        }

        fn feed(&mut self, kind: EventKind, session: &str, run: Option<&str>, data: Value) {
            self.feed_with(kind, session, run, data, None);
        }

        fn feed_with(
            &mut self,
            kind: EventKind,
            session: &str,
            run: Option<&str>,
            data: Value,
            error: Option<&str>,
        ) {
            self.feed_full(kind, None, session, run, data, error);
        }

        fn feed_agent(
            &mut self,
            kind: EventKind,
            agent: &str,
            session: &str,
            run: Option<&str>,
            data: Value,
        ) {
            self.feed_full(kind, Some(agent), session, run, data, None);
        }

        fn feed_full(
            &mut self,
            kind: EventKind,
            agent: Option<&str>,
            session: &str,
            run: Option<&str>,
            data: Value,
            error: Option<&str>,
        ) {
            self.next_ts += 100;
            let mut ev = TelemetryEvent::new(kind, EventSource::Hook);
            ev.id = TelemetryEvent::fresh_id();
            ev.ts = self.next_ts;
            ev.seq = self.next_ts / 100;
            ev.agent_id = agent.map(str::to_owned);
            ev.session_key = Some(session.to_owned());
            ev.run_id = run.map(str::to_owned);
            ev.data = data;
            ev.error = error.map(|m| ErrorInfo {
                message: m.to_owned(),
            });
            self.indexer.index_event(&ev).unwrap();
        }
    }

    fn seed_two_runs(fx: &mut Fixture) {
        fx.feed(EventKind::RunStart, "sess-a", Some("run-1"), json!({"model": "m-1"}));
        fx.feed(
            EventKind::ToolStart,
            "sess-a",
            Some("run-1"),
            json!({"toolName": "Read", "toolCallId": "c1"}),
        );
        fx.feed(
            EventKind::ToolEnd,
            "sess-a",
            Some("run-1"),
            json!({"toolCallId": "c1", "filePath": "/src/lib.rs"}),
        );
        fx.feed(
            EventKind::LlmCall,
            "sess-a",
            Some("run-1"),
            json!({"callIndex": 1, "inputTokens": 100, "outputTokens": 20, "costUsd": 0.01}),
        );
        fx.feed(
            EventKind::RunEnd,
            "sess-a",
            Some("run-1"),
            json!({"usage": {"input": 100, "output": 20, "total": 120}, "toolCallCount": 1}),
        );

        fx.feed(EventKind::RunStart, "sess-b", Some("run-2"), json!({}));
        fx.feed_with(
            EventKind::RunEnd,
            "sess-b",
            Some("run-2"),
            json!({"usage": {"input": 10, "output": 5, "total": 15}}),
            Some("run exploded"),
        );
    }

    #[test]
    fn list_runs_orders_newest_first_and_filters_by_session() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let all = list_runs(&conn, &ListRunsOptions::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].run_id, "run-2");

        let only_a = list_runs(
            &conn,
            &ListRunsOptions {
                session_key: Some("sess-a".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].run_id, "run-1");
        assert_eq!(only_a[0].total_tokens, Some(120));
    }

    #[test]
    fn list_runs_filters_by_model_and_time_window() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let by_model = list_runs(
            &conn,
            &ListRunsOptions {
                model: Some("m-1".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_model.len(), 1);
        assert_eq!(by_model[0].run_id, "run-1");

        // run-1 starts at ts 100, run-2 at ts 600.
        let windowed = list_runs(
            &conn,
            &ListRunsOptions {
                since: Some(200),
                until: Some(700),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].run_id, "run-2");
    }

    #[test]
    fn get_run_nests_tool_and_model_calls() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let detail = get_run(&conn, "run-1").unwrap().unwrap();
        assert_eq!(detail.run.tool_call_count, Some(1));
        assert_eq!(detail.tool_calls.len(), 1);
        assert_eq!(detail.tool_calls[0].file_path.as_deref(), Some("/src/lib.rs"));
        assert_eq!(detail.model_calls.len(), 1);
        assert_eq!(detail.model_calls[0].input_tokens, Some(100));

        assert!(get_run(&conn, "run-missing").unwrap().is_none());
    }

    #[test]
    fn tool_calls_filter_by_name_and_errors() {
        let mut fx = Fixture::new();
        fx.feed(
            EventKind::ToolEnd,
            "sess-a",
            Some("run-1"),
            json!({"toolName": "Bash", "toolCallId": "x", "isError": true, "execCommand": "rm"}),
        );
        fx.feed(
            EventKind::ToolEnd,
            "sess-a",
            Some("run-1"),
            json!({"toolName": "Read", "toolCallId": "y"}),
        );
        let conn = fx.conn();

        let errors = get_tool_calls(
            &conn,
            &ToolCallOptions {
                errors_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tool_name.as_deref(), Some("Bash"));

        let reads = get_tool_calls(
            &conn,
            &ToolCallOptions {
                tool_name: Some("Read".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].is_error, Some(false));
    }

    #[test]
    fn tool_calls_attributed_to_agent_through_runs() {
        let mut fx = Fixture::new();
        fx.feed_agent(EventKind::RunStart, "agent-1", "sess-a", Some("run-1"), json!({}));
        fx.feed_agent(EventKind::RunStart, "agent-2", "sess-a", Some("run-2"), json!({}));
        fx.feed(
            EventKind::ToolEnd,
            "sess-a",
            Some("run-1"),
            json!({"toolName": "Read", "toolCallId": "a"}),
        );
        fx.feed(
            EventKind::ToolEnd,
            "sess-a",
            Some("run-2"),
            json!({"toolName": "Bash", "toolCallId": "b"}),
        );
        let conn = fx.conn();

        let calls = get_tool_calls(
            &conn,
            &ToolCallOptions {
                agent_id: Some("agent-1".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name.as_deref(), Some("Read"));
    }

    #[test]
    fn session_timeline_is_chronological() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let timeline = get_session_timeline(&conn, "sess-a", &TimelineOptions::default()).unwrap();
        assert_eq!(timeline.len(), 5);
        assert!(timeline.windows(2).all(|w| w[0].ts <= w[1].ts));
        assert_eq!(timeline[0].kind, "run.start");
        assert_eq!(timeline.last().unwrap().kind, "run.end");
    }

    #[test]
    fn session_timeline_narrows_to_requested_kinds() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let edges = get_session_timeline(
            &conn,
            "sess-a",
            &TimelineOptions {
                kinds: Some(vec!["run.start".into(), "run.end".into()]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].kind, "run.start");
        assert_eq!(edges[1].kind, "run.end");

        // An empty kinds list means no kind filter at all.
        let all = get_session_timeline(
            &conn,
            "sess-a",
            &TimelineOptions {
                kinds: Some(Vec::new()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn usage_summary_sums_runs_and_model_call_cost() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let all = get_usage_summary(&conn, &UsageSummaryOptions::default()).unwrap();
        assert_eq!(all.run_count, 2);
        assert_eq!(all.input_tokens, 110);
        assert_eq!(all.total_tokens, 135);
        assert_eq!(all.tool_call_count, 1);
        assert!((all.cost_usd - 0.01).abs() < 1e-9);

        let scoped = get_usage_summary(
            &conn,
            &UsageSummaryOptions {
                session_key: Some("sess-b".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(scoped.run_count, 1);
        assert_eq!(scoped.total_tokens, 15);
        assert!(scoped.cost_usd.abs() < 1e-9);
    }

    #[test]
    fn usage_summary_honors_time_window() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        // run-2 starts at ts 600; a window opening there excludes run-1
        // and its model-call spend.
        let late = get_usage_summary(
            &conn,
            &UsageSummaryOptions {
                since: Some(600),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(late.run_count, 1);
        assert_eq!(late.total_tokens, 15);
        assert!(late.cost_usd.abs() < 1e-9);

        let early = get_usage_summary(
            &conn,
            &UsageSummaryOptions {
                until: Some(599),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(early.run_count, 1);
        assert!((early.cost_usd - 0.01).abs() < 1e-9);
    }

    #[test]
    fn list_events_filters_by_kind() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let ends = list_events(
            &conn,
            &ListEventsOptions {
                kind: Some("run.end".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ends.len(), 2);
        // Newest first.
        assert_eq!(ends[0].run_id.as_deref(), Some("run-2"));
    }

    #[test]
    fn list_events_filters_by_agent_and_time_window() {
        let mut fx = Fixture::new();
        fx.feed_agent(EventKind::RunStart, "agent-1", "sess-a", Some("run-1"), json!({}));
        fx.feed_agent(EventKind::RunEnd, "agent-1", "sess-a", Some("run-1"), json!({}));
        fx.feed_agent(EventKind::RunStart, "agent-2", "sess-b", Some("run-2"), json!({}));
        let conn = fx.conn();

        let mine = list_events(
            &conn,
            &ListEventsOptions {
                agent_id: Some("agent-1".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|e| e.agent_id.as_deref() == Some("agent-1")));

        // Events land at ts 100, 200, 300.
        let windowed = list_events(
            &conn,
            &ListEventsOptions {
                since: Some(150),
                until: Some(250),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].ts, 200);
    }

    #[test]
    fn file_operations_match_path_substring() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        fx.feed(
            EventKind::ToolEnd,
            "sess-a",
            Some("run-1"),
            json!({"toolName": "Write", "toolCallId": "w1", "filePath": "/docs/readme.md"}),
        );
        let conn = fx.conn();

        let hits = get_file_operations(
            &conn,
            &FileOperationsOptions {
                path_contains: Some("lib.rs".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path.as_deref(), Some("/src/lib.rs"));

        let all = get_file_operations(&conn, &FileOperationsOptions::default()).unwrap();
        assert_eq!(all.len(), 2);

        let scoped = get_file_operations(
            &conn,
            &FileOperationsOptions {
                run_id: Some("run-1".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(scoped.len(), 2);
        assert!(scoped.iter().all(|op| op.run_id.as_deref() == Some("run-1")));
    }

    #[test]
    fn sessions_aggregate_runs_and_spend() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        let conn = fx.conn();

        let sessions = list_sessions(&conn, &ListSessionsOptions::default()).unwrap();
        assert_eq!(sessions.len(), 2);
        // Most recently active first.
        assert_eq!(sessions[0].session_key, "sess-b");
        assert_eq!(sessions[0].error_count, 1);
        assert_eq!(sessions[1].session_key, "sess-a");
        assert_eq!(sessions[1].run_count, 1);
        assert_eq!(sessions[1].total_tokens, 120);
        assert_eq!(sessions[1].tool_call_count, 1);
        assert!((sessions[1].total_cost_usd - 0.01).abs() < 1e-9);
        assert!(sessions[1].first_run_at.unwrap() <= sessions[1].last_activity_at.unwrap());
    }

    #[test]
    fn cost_breakdown_buckets_by_dimension() {
        let mut fx = Fixture::new();
        fx.feed_agent(EventKind::RunStart, "agent-1", "sess-a", Some("run-1"), json!({}));
        fx.feed(
            EventKind::LlmCall,
            "sess-a",
            Some("run-1"),
            json!({"model": "m-1", "inputTokens": 100, "outputTokens": 10, "costUsd": 0.02}),
        );
        fx.feed(
            EventKind::LlmCall,
            "sess-a",
            Some("run-1"),
            json!({"model": "m-1", "inputTokens": 50, "outputTokens": 5, "costUsd": 0.01}),
        );
        fx.feed(
            EventKind::LlmCall,
            "sess-a",
            Some("run-1"),
            json!({"model": "m-2", "inputTokens": 10, "outputTokens": 1, "costUsd": 0.05}),
        );
        let conn = fx.conn();

        let by_model = get_cost_breakdown(&conn, &CostBreakdownOptions::default()).unwrap();
        assert_eq!(by_model.len(), 2);
        // Most expensive bucket first.
        assert_eq!(by_model[0].group_key, "m-2");
        assert!((by_model[0].total_cost_usd - 0.05).abs() < 1e-9);
        assert_eq!(by_model[1].group_key, "m-1");
        assert_eq!(by_model[1].call_count, 2);
        assert_eq!(by_model[1].input_tokens, 150);
        assert!((by_model[1].total_cost_usd - 0.03).abs() < 1e-9);

        let by_agent = get_cost_breakdown(
            &conn,
            &CostBreakdownOptions {
                group_by: CostGroupBy::Agent,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].group_key, "agent-1");
        assert_eq!(by_agent[0].call_count, 3);
        assert!((by_agent[0].total_cost_usd - 0.08).abs() < 1e-9);
    }

    #[test]
    fn messages_and_subagents_are_listable() {
        let mut fx = Fixture::new();
        fx.feed(
            EventKind::MessageInbound,
            "sess-a",
            None,
            json!({"channel": "chat", "from": "user-1", "contentPreview": "hello"}),
        );
        fx.feed(
            EventKind::SubagentSpawn,
            "sess-a",
            Some("run-1"),
            json!({"childSessionKey": "child-1", "task": "explore"}),
        );
        let conn = fx.conn();

        let messages = list_messages(
            &conn,
            &ListMessagesOptions {
                direction: Some("inbound".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from_id.as_deref(), Some("user-1"));

        let subagents = list_subagents(
            &conn,
            &ListSubagentsOptions {
                parent_session_key: Some("sess-a".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(subagents.len(), 1);
        assert_eq!(subagents[0].task.as_deref(), Some("explore"));
    }

    #[test]
    fn list_errors_unions_run_and_tool_failures() {
        let mut fx = Fixture::new();
        seed_two_runs(&mut fx);
        fx.feed_with(
            EventKind::ToolEnd,
            "sess-a",
            Some("run-1"),
            json!({"toolName": "Bash", "toolCallId": "boom"}),
            Some("exit 1"),
        );
        let conn = fx.conn();

        let errors = list_errors(&conn, &ListErrorsOptions::default()).unwrap();
        assert_eq!(errors.len(), 2);
        let origins: Vec<&str> = errors.iter().map(|e| e.origin.as_str()).collect();
        assert!(origins.contains(&"run"));
        assert!(origins.contains(&"tool"));

        let scoped = list_errors(
            &conn,
            &ListErrorsOptions {
                session_key: Some("sess-b".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].message, "run exploded");
    }
}
