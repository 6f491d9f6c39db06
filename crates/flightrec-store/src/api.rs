//! Pool-backed facade over the read-only queries.
//!
//! A [`QueryApi`] is only handed out by the pipeline once the store is
//! actually open; callers that reach for queries before then get
//! [`crate::StoreError::Unavailable`] from the pipeline instead of
//! silently-empty results.

use crate::errors::Result;
use crate::queries::{self, EventRow, MessageRow, ModelCallRow, SubagentRow, ToolCallRow};
use crate::queries::{
    CostBreakdownOptions, CostBreakdownRow, ErrorRow, FileOperationsOptions, ListErrorsOptions,
    ListEventsOptions, ListMessagesOptions, ListRunsOptions, ListSessionsOptions,
    ListSubagentsOptions, RunDetail, RunRow, SessionRow, TimelineOptions, ToolCallOptions,
    UsageSummary, UsageSummaryOptions,
};
use crate::sqlite::ConnectionPool;

/// Read-only query surface over the index database.
#[derive(Clone, Debug)]
pub struct QueryApi {
    pool: ConnectionPool,
}

impl QueryApi {
    /// Wrap an initialized connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// List runs, most recent first.
    pub fn list_runs(&self, options: &ListRunsOptions) -> Result<Vec<RunRow>> {
        let conn = self.pool.get()?;
        queries::list_runs(&conn, options)
    }

    /// Fetch one run with nested tool and model calls.
    pub fn get_run(&self, run_id: &str) -> Result<Option<RunDetail>> {
        let conn = self.pool.get()?;
        queries::get_run(&conn, run_id)
    }

    /// List tool calls, oldest first.
    pub fn get_tool_calls(&self, options: &ToolCallOptions) -> Result<Vec<ToolCallRow>> {
        let conn = self.pool.get()?;
        queries::get_tool_calls(&conn, options)
    }

    /// Chronological raw-event timeline for one session.
    pub fn get_session_timeline(
        &self,
        session_key: &str,
        options: &TimelineOptions,
    ) -> Result<Vec<EventRow>> {
        let conn = self.pool.get()?;
        queries::get_session_timeline(&conn, session_key, options)
    }

    /// Aggregate token/cost/tool-count totals.
    pub fn get_usage_summary(&self, options: &UsageSummaryOptions) -> Result<UsageSummary> {
        let conn = self.pool.get()?;
        queries::get_usage_summary(&conn, options)
    }

    /// List raw events, most recent first.
    pub fn list_events(&self, options: &ListEventsOptions) -> Result<Vec<EventRow>> {
        let conn = self.pool.get()?;
        queries::list_events(&conn, options)
    }

    /// Tool calls that touched a file, newest first.
    pub fn get_file_operations(
        &self,
        options: &FileOperationsOptions,
    ) -> Result<Vec<ToolCallRow>> {
        let conn = self.pool.get()?;
        queries::get_file_operations(&conn, options)
    }

    /// Model-call accounting for one run, in call order.
    pub fn get_model_calls(&self, run_id: &str) -> Result<Vec<ModelCallRow>> {
        let conn = self.pool.get()?;
        queries::get_model_calls(&conn, run_id)
    }

    /// Sessions with per-session aggregates, most recently active first.
    pub fn list_sessions(&self, options: &ListSessionsOptions) -> Result<Vec<SessionRow>> {
        let conn = self.pool.get()?;
        queries::list_sessions(&conn, options)
    }

    /// Model-call spend bucketed by one dimension, most expensive first.
    pub fn get_cost_breakdown(
        &self,
        options: &CostBreakdownOptions,
    ) -> Result<Vec<CostBreakdownRow>> {
        let conn = self.pool.get()?;
        queries::get_cost_breakdown(&conn, options)
    }

    /// List messages, most recent first.
    pub fn list_messages(&self, options: &ListMessagesOptions) -> Result<Vec<MessageRow>> {
        let conn = self.pool.get()?;
        queries::list_messages(&conn, options)
    }

    /// List sub-agent spawns, most recent first.
    pub fn list_subagents(&self, options: &ListSubagentsOptions) -> Result<Vec<SubagentRow>> {
        let conn = self.pool.get()?;
        queries::list_subagents(&conn, options)
    }

    /// Run and tool errors combined, newest first.
    pub fn list_errors(&self, options: &ListErrorsOptions) -> Result<Vec<ErrorRow>> {
        let conn = self.pool.get()?;
        queries::list_errors(&conn, options)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
