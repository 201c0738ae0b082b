//! Orchestrator error taxonomy.
//!
//! Isolation-provisioning errors abort `start`; runtime errors are confined
//! to the affected agent and surface through `on_error` hooks and error
//! topic events. Cleanup paths swallow errors.

use thiserror::Error;

/// Errors surfaced by the orchestrator core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Rejected before any side effect.
    #[error("invalid cluster config: {0}")]
    ConfigInvalid(String),

    /// The requested sandbox source is not inside a git repository.
    #[error("not a git repository: {0}")]
    NotAGitRepo(String),

    /// Sandbox provisioning failed; no cluster is registered.
    #[error("isolation provisioning failed: {0}")]
    IsolationFailed(String),

    /// Provider binary missing or unusable at start.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Non-zero exit or parse failure during `execute_task`; retryable.
    #[error("provider execution failed: {0}")]
    TransientProviderFailure(String),

    /// Direct-API 429; retryable.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Provider subprocess exceeded the agent's timeout.
    #[error("agent timed out after {0}ms")]
    AgentTimeout(u64),

    /// Caller-initiated via stop/kill; terminal, fires no `on_error` hook.
    #[error("cancelled")]
    Cancelled,

    /// Lookup of an unregistered cluster id.
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),
}

impl OrchestratorError {
    /// Whether the agent retry policy may re-enter `idle` after this error.
    ///
    /// Timeouts are not retryable: a run that blew its budget goes straight
    /// to `error` rather than being re-admitted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientProviderFailure(_) | Self::RateLimited(_)
        )
    }
}
