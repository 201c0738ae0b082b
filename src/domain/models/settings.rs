//! Orchestrator settings model.
//!
//! Loaded by `infrastructure::config::SettingsLoader` from a yaml file plus
//! `ZEROSHOT_*` environment overrides. Everything has a working default so
//! a missing settings file is not an error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::provider::ModelLevel;

/// Log output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// When set, a daily-rolling json log file is written here too.
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            dir: None,
        }
    }
}

/// Provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Path to the provider CLI binary.
    pub claude_path: String,
    /// Level used when an agent does not pick one.
    pub default_level: ModelLevel,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            claude_path: "claude".to_string(),
            default_level: ModelLevel::Level2,
        }
    }
}

/// Container isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Image launched for container-isolated clusters.
    pub image: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "node:20".to_string(),
        }
    }
}

/// Message bus settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// When set, each cluster mirrors its ledger to
    /// `<mirror_dir>/<cluster_id>.jsonl` (observability only).
    pub mirror_dir: Option<PathBuf>,
}

/// Top-level orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogSettings,
    /// Grace window for `stop` before in-flight executions are killed.
    pub grace_period_ms: u64,
    pub provider: ProviderSettings,
    pub container: ContainerSettings,
    pub bus: BusSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            grace_period_ms: 5_000,
            provider: ProviderSettings::default(),
            container: ContainerSettings::default(),
            bus: BusSettings::default(),
        }
    }
}
