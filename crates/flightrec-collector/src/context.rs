//! Identity context passed alongside every hook callback.

use serde_json::Value;

/// Who/where a lifecycle event came from. All fields optional: producers
/// report what they know and the projections tolerate gaps.
#[derive(Clone, Debug, Default)]
pub struct HookContext {
    /// Agent that fired the hook.
    pub agent_id: Option<String>,
    /// Routing key of the owning session.
    pub session_key: Option<String>,
    /// Provider-side session identifier.
    pub session_id: Option<String>,
    /// Run the hook belongs to, when known.
    pub run_id: Option<String>,
}

impl HookContext {
    /// Context scoped to a session.
    pub fn for_session(session_key: impl Into<String>) -> Self {
        Self {
            session_key: Some(session_key.into()),
            ..Self::default()
        }
    }

    /// Same context with a run id attached.
    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Build a context from a diagnostic bus message's identity fields.
    pub fn from_diagnostic(msg: &Value) -> Self {
        let field = |key: &str| msg.get(key).and_then(Value::as_str).map(str::to_owned);
        Self {
            agent_id: field("agentId"),
            session_key: field("sessionKey"),
            session_id: field("sessionId"),
            run_id: field("runId"),
        }
    }
}
