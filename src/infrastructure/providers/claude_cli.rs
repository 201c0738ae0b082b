//! Claude CLI provider adapter.
//!
//! Shells out to the `claude` binary. Flags are emitted purely from the
//! capability bitset probed at startup; an explicitly unsupported flag is
//! omitted with a one-time warning. The prompt travels over stdin.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::models::provider::{
    CliInvocation, InvocationSpec, ModelLevel, OutputFormat, ResolvedModel,
};
use crate::domain::ports::errors::OrchestratorError;
use crate::domain::ports::provider::{EventStreamParser, Provider, ProviderCapabilities};

use super::capabilities::{features, WarnOnce};
use super::models::ModelTable;
use super::stream::JsonLineParser;

/// Provider id for the Claude CLI adapter.
pub const CLAUDE_PROVIDER_ID: &str = "claude";

/// Claude CLI adapter.
pub struct ClaudeCliProvider {
    binary: String,
    /// Leading args from a `ZEROSHOT_CLAUDE_COMMAND` override.
    leading_args: Vec<String>,
    capabilities: ProviderCapabilities,
    table: ModelTable,
    warn_once: Arc<WarnOnce>,
}

impl ClaudeCliProvider {
    /// Build the adapter around an already-probed capability set.
    pub fn new(
        binary: impl Into<String>,
        leading_args: Vec<String>,
        capabilities: ProviderCapabilities,
        warn_once: Arc<WarnOnce>,
    ) -> Self {
        Self {
            binary: binary.into(),
            leading_args,
            capabilities,
            table: ModelTable::claude_cli(),
            warn_once,
        }
    }

    /// Split a `ZEROSHOT_CLAUDE_COMMAND` override into binary + leading args.
    pub fn split_command_override(raw: &str) -> Option<(String, Vec<String>)> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let binary = parts.next()?;
        Some((binary, parts.collect()))
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn push_output_format(&self, spec: &InvocationSpec, args: &mut Vec<String>) {
        if !self.capabilities.supports_output_format {
            self.warn_once
                .unsupported(CLAUDE_PROVIDER_ID, features::OUTPUT_FORMAT);
            return;
        }

        let format = match spec.output_format {
            OutputFormat::StreamJson if !self.capabilities.supports_stream_json => {
                self.warn_once
                    .unsupported(CLAUDE_PROVIDER_ID, features::STREAM_JSON);
                OutputFormat::Json
            }
            OutputFormat::Json if !self.capabilities.supports_json => {
                self.warn_once.unsupported(CLAUDE_PROVIDER_ID, features::JSON);
                OutputFormat::Text
            }
            other => other,
        };
        args.push("--output-format".to_string());
        args.push(format.as_str().to_string());

        if format == OutputFormat::StreamJson {
            // stream-json requires verbose mode and benefits from partials.
            if self.capabilities.supports_verbose {
                args.push("--verbose".to_string());
            } else {
                self.warn_once
                    .unsupported(CLAUDE_PROVIDER_ID, features::VERBOSE);
            }
            if self.capabilities.supports_include_partials {
                args.push("--include-partial-messages".to_string());
            } else {
                self.warn_once
                    .unsupported(CLAUDE_PROVIDER_ID, features::INCLUDE_PARTIALS);
            }
        }
    }
}

#[async_trait]
impl Provider for ClaudeCliProvider {
    fn provider_id(&self) -> &str {
        CLAUDE_PROVIDER_ID
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn resolve_model(&self, level: ModelLevel) -> ResolvedModel {
        self.table.resolve(level)
    }

    fn build_invocation(&self, spec: &InvocationSpec) -> Result<CliInvocation, OrchestratorError> {
        let mut args = self.leading_args.clone();

        // Non-interactive single-shot mode; prompt arrives on stdin.
        args.push("--print".to_string());

        self.push_output_format(spec, &mut args);

        if self.capabilities.supports_model {
            let resolved = self.resolve_model(spec.level);
            args.push("--model".to_string());
            args.push(resolved.model_id);
        } else {
            self.warn_once
                .unsupported(CLAUDE_PROVIDER_ID, features::MODEL);
        }

        if spec.auto_approve {
            if self.capabilities.supports_auto_approve {
                args.push("--dangerously-skip-permissions".to_string());
            } else {
                self.warn_once
                    .unsupported(CLAUDE_PROVIDER_ID, features::AUTO_APPROVE);
            }
        }

        if let Some(ref schema) = spec.schema {
            if self.capabilities.supports_json_schema {
                args.push("--json-schema".to_string());
                args.push(schema.to_string());
            } else {
                self.warn_once
                    .unsupported(CLAUDE_PROVIDER_ID, features::JSON_SCHEMA);
            }
        }

        if let Some(ref cwd) = spec.cwd {
            if self.capabilities.supports_cwd {
                args.push("--add-dir".to_string());
                args.push(cwd.display().to_string());
            } else {
                self.warn_once.unsupported(CLAUDE_PROVIDER_ID, features::CWD);
            }
        }

        Ok(CliInvocation {
            binary: self.binary.clone(),
            args,
            env: HashMap::new(),
            stdin: Some(spec.context.clone()),
        })
    }

    fn event_parser(&self) -> Box<dyn EventStreamParser> {
        Box::new(JsonLineParser::new())
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .args(&self.leading_args)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec() -> InvocationSpec {
        InvocationSpec {
            context: "fix the bug".to_string(),
            level: ModelLevel::Level2,
            output_format: OutputFormat::StreamJson,
            schema: None,
            cwd: Some(PathBuf::from("/work")),
            auto_approve: true,
        }
    }

    fn provider(capabilities: ProviderCapabilities) -> ClaudeCliProvider {
        ClaudeCliProvider::new("claude", vec![], capabilities, Arc::new(WarnOnce::new()))
    }

    #[test]
    fn test_full_capabilities_argv() {
        let provider = provider(ProviderCapabilities::all_true());
        let invocation = provider.build_invocation(&spec()).unwrap();

        assert_eq!(invocation.binary, "claude");
        assert!(invocation.args.contains(&"--print".to_string()));
        assert!(invocation.args.contains(&"--output-format".to_string()));
        assert!(invocation.args.contains(&"stream-json".to_string()));
        assert!(invocation.args.contains(&"--verbose".to_string()));
        assert!(invocation
            .args
            .contains(&"--include-partial-messages".to_string()));
        assert!(invocation.args.contains(&"--model".to_string()));
        assert!(invocation
            .args
            .contains(&"--dangerously-skip-permissions".to_string()));
        assert_eq!(invocation.stdin.as_deref(), Some("fix the bug"));
    }

    #[test]
    fn test_unsupported_stream_json_downgrades() {
        let capabilities = ProviderCapabilities {
            supports_stream_json: false,
            ..ProviderCapabilities::all_true()
        };
        let provider = provider(capabilities);
        let invocation = provider.build_invocation(&spec()).unwrap();

        assert!(!invocation.args.contains(&"stream-json".to_string()));
        assert!(invocation.args.contains(&"json".to_string()));
    }

    #[test]
    fn test_unsupported_flags_are_omitted() {
        let capabilities = ProviderCapabilities {
            supports_model: false,
            supports_auto_approve: false,
            supports_cwd: false,
            ..ProviderCapabilities::all_true()
        };
        let provider = provider(capabilities);
        let invocation = provider.build_invocation(&spec()).unwrap();

        assert!(!invocation.args.contains(&"--model".to_string()));
        assert!(!invocation
            .args
            .contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!invocation.args.contains(&"--add-dir".to_string()));
    }

    #[test]
    fn test_schema_is_serialized_into_argv() {
        let provider = provider(ProviderCapabilities::all_true());
        let mut invocation_spec = spec();
        invocation_spec.schema = Some(serde_json::json!({"type": "object"}));

        let invocation = provider.build_invocation(&invocation_spec).unwrap();
        let schema_pos = invocation
            .args
            .iter()
            .position(|a| a == "--json-schema")
            .expect("schema flag present");
        assert!(invocation.args[schema_pos + 1].contains("object"));
    }

    #[test]
    fn test_command_override_split() {
        let (binary, leading) =
            ClaudeCliProvider::split_command_override("npx claude --beta").unwrap();
        assert_eq!(binary, "npx");
        assert_eq!(leading, vec!["claude".to_string(), "--beta".to_string()]);

        assert!(ClaudeCliProvider::split_command_override("  ").is_none());
    }

    #[test]
    fn test_leading_args_precede_flags() {
        let provider = ClaudeCliProvider::new(
            "npx",
            vec!["claude".to_string()],
            ProviderCapabilities::all_true(),
            Arc::new(WarnOnce::new()),
        );
        let invocation = provider.build_invocation(&spec()).unwrap();
        assert_eq!(invocation.args[0], "claude");
        assert_eq!(invocation.args[1], "--print");
    }
}
