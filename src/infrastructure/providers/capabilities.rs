//! Provider capability detection.
//!
//! Capabilities are probed once at startup from the provider's `--help`
//! output and frozen into a [`ProviderCapabilities`] struct; argv building
//! consults only the struct, never the help text again. Unparseable help
//! defaults every capability to true (optimistic). When a capability is
//! explicitly false, the corresponding flag is omitted and a warning is
//! emitted once per `<provider>-<feature>` key.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::ports::provider::ProviderCapabilities;

/// Feature-name constants used for warn-once keys.
pub mod features {
    pub const JSON: &str = "json";
    pub const OUTPUT_SCHEMA: &str = "outputSchema";
    pub const AUTO_APPROVE: &str = "autoApprove";
    pub const CWD: &str = "cwd";
    pub const CONFIG_OVERRIDE: &str = "configOverride";
    pub const MODEL: &str = "model";
    pub const STREAM_JSON: &str = "streamJson";
    pub const VERBOSE: &str = "verbose";
    pub const INCLUDE_PARTIALS: &str = "includePartials";
    pub const JSON_SCHEMA: &str = "jsonSchema";
    pub const OUTPUT_FORMAT: &str = "outputFormat";
}

/// Parse a help text into a capability bitset.
///
/// Empty or whitespace-only help is treated as unparseable: all true.
pub fn capabilities_from_help(help: &str) -> ProviderCapabilities {
    if help.trim().is_empty() {
        return ProviderCapabilities::all_true();
    }

    ProviderCapabilities {
        supports_json: help.contains("json"),
        supports_output_schema: help.contains("--output-schema"),
        supports_auto_approve: help.contains("--dangerously-skip-permissions")
            || help.contains("--auto-approve")
            || help.contains("--yes"),
        supports_cwd: help.contains("--cwd") || help.contains("--add-dir"),
        supports_config_override: help.contains("--settings") || help.contains("--config"),
        supports_model: help.contains("--model"),
        supports_stream_json: help.contains("stream-json"),
        supports_verbose: help.contains("--verbose"),
        supports_include_partials: help.contains("--include-partial-messages"),
        supports_json_schema: help.contains("--json-schema"),
        supports_output_format: help.contains("--output-format"),
    }
}

/// Run `<binary> --help` and derive capabilities from its output.
///
/// A failed spawn or empty output falls back to the optimistic default.
pub async fn probe_capabilities(binary: &str, leading_args: &[String]) -> ProviderCapabilities {
    let output = Command::new(binary)
        .args(leading_args)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            let mut help = String::from_utf8_lossy(&output.stdout).into_owned();
            // Some CLIs print usage on stderr.
            help.push_str(&String::from_utf8_lossy(&output.stderr));
            let caps = capabilities_from_help(&help);
            debug!(binary, ?caps, "Probed provider capabilities");
            caps
        }
        Err(e) => {
            debug!(binary, error = %e, "Capability probe failed, assuming all capabilities");
            ProviderCapabilities::all_true()
        }
    }
}

/// Deduplicating warning sink keyed by `<provider>-<feature>`.
///
/// Owned by the provider registry; per-process state, as small as it looks.
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: Mutex<HashSet<String>>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `message` at warn level the first time `key` is seen.
    ///
    /// Returns true when the warning was actually emitted.
    pub fn warn(&self, key: impl Into<String>, message: &str) -> bool {
        let key = key.into();
        let mut seen = self.seen.lock().expect("warn-once lock poisoned");
        if seen.insert(key.clone()) {
            warn!(key = %key, "{message}");
            true
        } else {
            false
        }
    }

    /// Warn-once for an unsupported capability flag.
    pub fn unsupported(&self, provider: &str, feature: &str) -> bool {
        self.warn(
            format!("{provider}-{feature}"),
            &format!("provider '{provider}' does not support {feature}; omitting flag"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAUDE_HELP: &str = "\
Usage: claude [options] [prompt]

Options:
  --model <model>                  Model to use
  --output-format <format>         Output format: text, json, stream-json
  --verbose                        Verbose output
  --include-partial-messages       Stream partial message chunks
  --dangerously-skip-permissions   Skip permission prompts
  --settings <file>                Settings file override
  --add-dir <dir>                  Additional working directory
  --json-schema <schema>           Constrain output to a JSON schema
";

    #[test]
    fn test_full_help_detects_everything() {
        let caps = capabilities_from_help(CLAUDE_HELP);
        assert!(caps.supports_model);
        assert!(caps.supports_output_format);
        assert!(caps.supports_stream_json);
        assert!(caps.supports_verbose);
        assert!(caps.supports_include_partials);
        assert!(caps.supports_auto_approve);
        assert!(caps.supports_config_override);
        assert!(caps.supports_cwd);
        assert!(caps.supports_json_schema);
        assert!(caps.supports_json);
    }

    #[test]
    fn test_missing_tokens_are_explicitly_false() {
        let caps = capabilities_from_help("Usage: other [prompt]\n  --model <m>\n");
        assert!(caps.supports_model);
        assert!(!caps.supports_output_format);
        assert!(!caps.supports_stream_json);
        assert!(!caps.supports_verbose);
    }

    #[test]
    fn test_empty_help_is_optimistic() {
        let caps = capabilities_from_help("   \n");
        assert_eq!(caps, ProviderCapabilities::all_true());
    }

    #[test]
    fn test_warn_once_dedups_by_key() {
        let warn_once = WarnOnce::new();
        assert!(warn_once.unsupported("claude", features::VERBOSE));
        assert!(!warn_once.unsupported("claude", features::VERBOSE));
        assert!(warn_once.unsupported("claude", features::MODEL));
        assert!(warn_once.unsupported("codex", features::VERBOSE));
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_optimistic() {
        let caps = probe_capabilities("definitely-not-a-real-binary-zx", &[]).await;
        assert_eq!(caps, ProviderCapabilities::all_true());
    }
}
