//! Configuration loading.
//!
//! Orchestrator settings come from a yaml file (selected by
//! `ZEROSHOT_SETTINGS_FILE`, default `zeroshot.yaml`) merged with
//! `ZEROSHOT_*` environment overrides via figment. Cluster wiring files are
//! plain yaml, loaded separately. Process environment is captured exactly
//! once at startup into [`RuntimeEnv`].

mod loader;

pub use loader::SettingsLoader;

use std::path::PathBuf;

/// Environment variables with a load-bearing contract, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnv {
    /// Enables the direct-API fast path when present.
    pub anthropic_api_key: Option<String>,
    /// Settings file path override.
    pub settings_file: Option<PathBuf>,
    /// Provider binary + leading args override, space-split.
    pub claude_command: Option<String>,
}

impl RuntimeEnv {
    /// Capture the process environment. Call once, at startup.
    pub fn capture() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            settings_file: std::env::var("ZEROSHOT_SETTINGS_FILE")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            claude_command: std::env::var("ZEROSHOT_CLAUDE_COMMAND")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}
