//! Agent domain model.
//!
//! An agent is declared in the cluster configuration: a list of triggers
//! over bus topics, a prompt template, hooks that fire on completion or
//! failure, and execution knobs (timeout, retries, model level, direct-API
//! opt-in).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::provider::ModelLevel;

/// Role tag with stop-authority semantics.
pub const ROLE_ORCHESTRATOR: &str = "orchestrator";

/// Role that auto-opts into the direct-API fast path when combined with a
/// JSON schema.
pub const ROLE_CONDUCTOR: &str = "conductor";

/// Runtime state of an agent's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Waiting for bus events above the cursor.
    Idle,
    /// Walking new events against the trigger list.
    Evaluating,
    /// Assembling the provider prompt.
    BuildingContext,
    /// A provider invocation is in flight.
    Executing,
    /// Terminal: stopped by the supervisor or a cancellation.
    Stopped,
    /// A run failed and the retry policy is exhausted (or pending).
    Error,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Evaluating => "evaluating",
            Self::BuildingContext => "building_context",
            Self::Executing => "executing",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// What an agent does when a trigger fires (or a hook runs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    /// Run the provider with the configured prompt and the event payload.
    ExecuteTask,
    /// Append a new message to the bus.
    PublishMessage {
        topic: String,
        #[serde(default)]
        payload: Value,
    },
    /// Publish the reserved `CLUSTER_STOP` message the supervisor watches.
    StopCluster,
    /// Do nothing.
    Noop,
}

/// Predicate over an event payload, evaluated after the topic match.
///
/// Paths are dot-separated (`"review.verdict"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// The value at `path` equals `value`.
    PayloadEquals { path: String, value: Value },
    /// The string value at `path` contains `needle`.
    PayloadContains { path: String, needle: String },
    /// A value exists at `path`.
    PayloadExists { path: String },
}

impl TriggerCondition {
    /// Evaluate against a payload. Missing paths never match.
    pub fn holds(&self, payload: &Value) -> bool {
        match self {
            Self::PayloadEquals { path, value } => {
                lookup_path(payload, path).is_some_and(|found| found == value)
            }
            Self::PayloadContains { path, needle } => lookup_path(payload, path)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Self::PayloadExists { path } => lookup_path(payload, path).is_some(),
        }
    }
}

/// Resolve a dot-separated path inside a JSON value.
pub fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// One `(topic, condition, action)` rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Topic the rule listens on.
    pub topic: String,
    /// Action taken when the rule fires.
    pub action: AgentAction,
    /// Optional payload predicate; absent means always fire on topic match.
    #[serde(default)]
    pub condition: Option<TriggerCondition>,
}

impl TriggerSpec {
    /// Whether this trigger fires for the given topic and payload.
    pub fn matches(&self, topic: &str, payload: &Value) -> bool {
        if self.topic != topic {
            return false;
        }
        match &self.condition {
            Some(condition) => condition.holds(payload),
            None => true,
        }
    }
}

/// Hook actions run in the same transition as the result they react to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentHooks {
    /// Runs after a successful provider result, before returning to idle.
    #[serde(default)]
    pub on_complete: Option<AgentAction>,
    /// Runs after a failed or timed-out run, before entering error.
    #[serde(default)]
    pub on_error: Option<AgentAction>,
}

fn default_max_retries() -> u32 {
    2
}

/// Declarative agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique within the cluster.
    pub id: String,
    /// Free-form role tag; see [`ROLE_ORCHESTRATOR`] and [`ROLE_CONDUCTOR`].
    #[serde(default)]
    pub role: String,
    /// Ordered trigger list; first match per event wins.
    pub triggers: Vec<TriggerSpec>,
    /// Prompt template with `{{payload}}` / `{{payload.<path>}}` /
    /// `{{topic}}` / `{{agent}}` / `{{cluster}}` substitution.
    #[serde(default)]
    pub prompt: String,
    /// Optional system preamble prepended to the assembled context.
    #[serde(default)]
    pub system_preamble: Option<String>,
    #[serde(default)]
    pub hooks: AgentHooks,
    /// Per-run timeout in milliseconds; `0` disables the check.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Explicit direct-API opt-in; `None` leaves it to auto-detection.
    #[serde(default)]
    pub use_direct_api: Option<bool>,
    /// JSON schema for structured output.
    #[serde(default)]
    pub json_schema: Option<Value>,
    /// Model capability tier; the provider's table resolves it.
    #[serde(default)]
    pub model_level: Option<ModelLevel>,
    /// Error-to-idle re-entries allowed for retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl AgentSpec {
    /// Whether this agent's role carries stop-authority.
    pub fn has_stop_authority(&self) -> bool {
        self.role == ROLE_ORCHESTRATOR
    }

    /// Direct-API decision: explicit flag wins, else role `conductor` with a
    /// schema auto-opts in. The runtime still requires a credential.
    pub fn wants_direct_api(&self) -> bool {
        match self.use_direct_api {
            Some(explicit) => explicit,
            None => self.role == ROLE_CONDUCTOR && self.json_schema.is_some(),
        }
    }
}
