//! Provider port.
//!
//! Abstracts an external AI-assistant CLI behind a capability-gated command
//! builder and a stream parser, plus the optional direct-API client used by
//! the fast path. Implementations live in `infrastructure::providers`.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::models::provider::{
    CliInvocation, InvocationSpec, ModelLevel, ProviderEvent, ResolvedModel, TokenUsage,
};
use crate::domain::ports::errors::OrchestratorError;

/// Features a provider CLI may or may not expose, detected once at startup
/// from its help output. Unknown means optimistic `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_json: bool,
    pub supports_output_schema: bool,
    pub supports_auto_approve: bool,
    pub supports_cwd: bool,
    pub supports_config_override: bool,
    pub supports_model: bool,
    pub supports_stream_json: bool,
    pub supports_verbose: bool,
    pub supports_include_partials: bool,
    pub supports_json_schema: bool,
    pub supports_output_format: bool,
}

impl ProviderCapabilities {
    /// Optimistic default used when help output is unparseable.
    pub fn all_true() -> Self {
        Self {
            supports_json: true,
            supports_output_schema: true,
            supports_auto_approve: true,
            supports_cwd: true,
            supports_config_override: true,
            supports_model: true,
            supports_stream_json: true,
            supports_verbose: true,
            supports_include_partials: true,
            supports_json_schema: true,
            supports_output_format: true,
        }
    }
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self::all_true()
    }
}

/// Incremental parser from provider stdout lines to neutral events.
///
/// One parser instance per invocation: it carries the per-run unknown-event
/// counters.
pub trait EventStreamParser: Send {
    /// Parse one stdout line. A line may yield zero or more neutral events.
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent>;
}

/// A provider CLI adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable id, e.g. `"claude"`.
    fn provider_id(&self) -> &str;

    /// Capability bitset detected at startup.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Resolve an abstract level against this provider's model table.
    fn resolve_model(&self, level: ModelLevel) -> ResolvedModel;

    /// Build the argv/env/stdin for one invocation, honoring capabilities.
    fn build_invocation(&self, spec: &InvocationSpec) -> Result<CliInvocation, OrchestratorError>;

    /// Fresh stream parser for one invocation.
    fn event_parser(&self) -> Box<dyn EventStreamParser>;

    /// Whether the provider binary is currently usable.
    async fn is_available(&self) -> bool;
}

/// Request to the direct-API fast path.
#[derive(Debug, Clone)]
pub struct DirectApiRequest {
    /// Assembled context string.
    pub context: String,
    /// Abstract level; the client resolves it with its own table.
    pub level: ModelLevel,
    /// When set, the response is parsed as JSON against this schema with
    /// the resilient extraction policy.
    pub schema: Option<Value>,
}

/// Response from the direct-API fast path.
#[derive(Debug, Clone)]
pub struct DirectApiResponse {
    /// Raw assistant text.
    pub text: String,
    /// Extracted structured output when a schema was requested.
    pub structured: Option<Value>,
    pub usage: TokenUsage,
}

/// Direct provider API client, bypassing the CLI subprocess.
#[async_trait]
pub trait DirectApiClient: Send + Sync {
    async fn complete(&self, request: DirectApiRequest)
        -> Result<DirectApiResponse, OrchestratorError>;
}
