//! Provider invocation domain model.
//!
//! The orchestrator speaks in abstract capability tiers and a neutral event
//! union; per-provider adapters translate both directions.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Abstract model capability tier. Per-provider tables resolve a level to a
/// concrete model id (and, where supported, a reasoning effort).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLevel {
    Level1,
    Level2,
    Level3,
}

impl ModelLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level1 => "level1",
            Self::Level2 => "level2",
            Self::Level3 => "level3",
        }
    }

    /// Clamp into an inclusive range.
    pub fn clamp_to(self, min: Self, max: Self) -> Self {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }
}

/// A level resolved against a provider's model table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Provider-specific model id.
    pub model_id: String,
    /// Only set for providers that declare reasoning-effort support.
    pub reasoning_effort: Option<String>,
}

/// Requested output shape for a provider run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    Json,
    StreamJson,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

/// Everything an adapter needs to build one provider run.
#[derive(Debug, Clone)]
pub struct InvocationSpec {
    /// Fully assembled prompt.
    pub context: String,
    /// Capability tier; the provider clamps and resolves it.
    pub level: ModelLevel,
    /// Requested output shape.
    pub output_format: OutputFormat,
    /// Optional JSON schema for structured output.
    pub schema: Option<Value>,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Whether the provider may act without interactive approval.
    pub auto_approve: bool,
}

/// A ready-to-spawn CLI command produced by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliInvocation {
    pub binary: String,
    pub args: Vec<String>,
    /// Additions merged over the inherited parent environment.
    pub env: HashMap<String, String>,
    /// Written to the child's stdin, then stdin is closed.
    pub stdin: Option<String>,
}

/// Token accounting reported by a provider's result event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Neutral event union parsed from a provider's output stream.
///
/// Deliberately a tagged sum, not a bag of optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// Assistant text fragment.
    Text { text: String },
    /// Reasoning fragment.
    Thinking { text: String },
    /// Tool invocation requested by the model.
    ToolCall {
        tool_id: String,
        tool_name: String,
        input: Value,
    },
    /// Tool output fed back to the model.
    ToolResult {
        tool_id: String,
        content: Value,
        is_error: bool,
    },
    /// Terminal event for the run.
    Result {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Outcome of a completed provider run, accumulated from the event stream.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Concatenated assistant text.
    pub text: String,
    /// Token usage from the result event, if reported.
    pub usage: TokenUsage,
    /// Number of tool calls observed.
    pub tool_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering_and_clamp() {
        assert!(ModelLevel::Level1 < ModelLevel::Level3);
        assert_eq!(
            ModelLevel::Level3.clamp_to(ModelLevel::Level1, ModelLevel::Level2),
            ModelLevel::Level2
        );
        assert_eq!(
            ModelLevel::Level1.clamp_to(ModelLevel::Level2, ModelLevel::Level3),
            ModelLevel::Level2
        );
        assert_eq!(
            ModelLevel::Level2.clamp_to(ModelLevel::Level1, ModelLevel::Level3),
            ModelLevel::Level2
        );
    }

    #[test]
    fn test_provider_event_tagged_serde() {
        let line = r#"{"type":"tool_call","tool_id":"t1","tool_name":"bash","input":{"cmd":"ls"}}"#;
        let event: ProviderEvent = serde_json::from_str(line).unwrap();

        assert_eq!(
            event,
            ProviderEvent::ToolCall {
                tool_id: "t1".to_string(),
                tool_name: "bash".to_string(),
                input: serde_json::json!({"cmd": "ls"}),
            }
        );
    }

    #[test]
    fn test_result_event_optional_fields() {
        let line = r#"{"type":"result","success":true}"#;
        let event: ProviderEvent = serde_json::from_str(line).unwrap();

        match event {
            ProviderEvent::Result {
                success,
                input_tokens,
                output_tokens,
                error,
            } => {
                assert!(success);
                assert!(input_tokens.is_none());
                assert!(output_tokens.is_none());
                assert!(error.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_output_format_str() {
        assert_eq!(OutputFormat::StreamJson.as_str(), "stream-json");
    }
}
