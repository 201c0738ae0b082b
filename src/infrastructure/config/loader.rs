//! Settings loader.

use std::path::PathBuf;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use tracing::debug;

use crate::domain::models::settings::Settings;

use super::RuntimeEnv;

/// Default settings file name, relative to the working directory.
const DEFAULT_SETTINGS_FILE: &str = "zeroshot.yaml";

/// Loads [`Settings`] from defaults, the yaml file, and env overrides.
pub struct SettingsLoader;

impl SettingsLoader {
    /// Load settings. A missing file is fine; defaults apply.
    ///
    /// Precedence, lowest to highest: built-in defaults, the yaml file,
    /// `ZEROSHOT_*` environment variables (nested keys joined with `__`,
    /// e.g. `ZEROSHOT_LOG__LEVEL=debug`).
    pub fn load(env: &RuntimeEnv) -> Result<Settings> {
        let path = env
            .settings_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

        debug!(path = %path.display(), "Loading settings");

        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("ZEROSHOT_").split("__"))
            .extract()
            .context("Failed to load settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        temp_env::with_vars_unset(["ZEROSHOT_GRACE_PERIOD_MS"], || {
            let env = RuntimeEnv {
                settings_file: Some(PathBuf::from("/definitely/not/here.yaml")),
                ..RuntimeEnv::default()
            };
            let settings = SettingsLoader::load(&env).unwrap();
            assert_eq!(settings.grace_period_ms, 5_000);
        });
    }

    #[test]
    fn test_file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "grace_period_ms: 1234\nprovider:\n  claude_path: /opt/claude").unwrap();

        let env = RuntimeEnv {
            settings_file: Some(file.path().to_path_buf()),
            ..RuntimeEnv::default()
        };
        let settings = SettingsLoader::load(&env).unwrap();
        assert_eq!(settings.grace_period_ms, 1234);
        assert_eq!(settings.provider.claude_path, "/opt/claude");
        // Untouched sections keep defaults.
        assert_eq!(settings.container.image, "node:20");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "grace_period_ms: 1234").unwrap();

        temp_env::with_var("ZEROSHOT_GRACE_PERIOD_MS", Some("99"), || {
            let env = RuntimeEnv {
                settings_file: Some(file.path().to_path_buf()),
                ..RuntimeEnv::default()
            };
            let settings = SettingsLoader::load(&env).unwrap();
            assert_eq!(settings.grace_period_ms, 99);
        });
    }

    #[test]
    fn test_nested_env_override() {
        temp_env::with_var("ZEROSHOT_LOG__LEVEL", Some("debug"), || {
            let env = RuntimeEnv::default();
            let settings = SettingsLoader::load(&env).unwrap();
            assert_eq!(settings.log.level, "debug");
        });
    }
}
