//! Provider registry.
//!
//! Owned by the supervisor and instantiated once at start: probes CLI
//! capabilities, applies the `ZEROSHOT_CLAUDE_COMMAND` override, and holds
//! the optional direct-API client plus the process-wide warn-once map.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::domain::models::settings::Settings;
use crate::domain::ports::errors::OrchestratorError;
use crate::domain::ports::provider::{DirectApiClient, Provider};
use crate::infrastructure::config::RuntimeEnv;

use super::anthropic_api::AnthropicApiClient;
use super::capabilities::{probe_capabilities, WarnOnce};
use super::claude_cli::{ClaudeCliProvider, CLAUDE_PROVIDER_ID};

/// Registry of provider adapters for one orchestrator process.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider_id: String,
    direct_api: Option<Arc<dyn DirectApiClient>>,
    warn_once: Arc<WarnOnce>,
}

impl ProviderRegistry {
    /// Build the registry from settings and the startup env snapshot.
    ///
    /// Capability probing happens here, once; invocation building later
    /// consults only the frozen structs.
    pub async fn from_settings(settings: &Settings, env: &RuntimeEnv) -> Self {
        let warn_once = Arc::new(WarnOnce::new());

        let (binary, leading_args) = env
            .claude_command
            .as_deref()
            .and_then(ClaudeCliProvider::split_command_override)
            .unwrap_or_else(|| (settings.provider.claude_path.clone(), Vec::new()));

        let capabilities = probe_capabilities(&binary, &leading_args).await;
        let claude = Arc::new(ClaudeCliProvider::new(
            binary,
            leading_args,
            capabilities,
            Arc::clone(&warn_once),
        ));

        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        providers.insert(CLAUDE_PROVIDER_ID.to_string(), claude);

        let direct_api: Option<Arc<dyn DirectApiClient>> = env
            .anthropic_api_key
            .as_ref()
            .map(|key| Arc::new(AnthropicApiClient::new(key.clone())) as Arc<dyn DirectApiClient>);

        info!(
            providers = providers.len(),
            direct_api = direct_api.is_some(),
            "Provider registry initialized"
        );

        Self {
            providers,
            default_provider_id: CLAUDE_PROVIDER_ID.to_string(),
            direct_api,
            warn_once,
        }
    }

    /// Registry with injected providers, for tests.
    pub fn with_providers(
        providers: Vec<Arc<dyn Provider>>,
        direct_api: Option<Arc<dyn DirectApiClient>>,
    ) -> Self {
        let default_provider_id = providers
            .first()
            .map(|p| p.provider_id().to_string())
            .unwrap_or_default();
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.provider_id().to_string(), p))
                .collect(),
            default_provider_id,
            direct_api,
            warn_once: Arc::new(WarnOnce::new()),
        }
    }

    /// The default provider adapter.
    pub fn default_provider(&self) -> Result<Arc<dyn Provider>, OrchestratorError> {
        self.providers
            .get(&self.default_provider_id)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::ProviderUnavailable(format!(
                    "default provider '{}' not registered",
                    self.default_provider_id
                ))
            })
    }

    /// Lookup by id.
    pub fn provider(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    /// The direct-API client, present only when a credential was captured.
    pub fn direct_api(&self) -> Option<Arc<dyn DirectApiClient>> {
        self.direct_api.clone()
    }

    /// Shared warn-once map (keyed `<provider>-<feature>`).
    pub fn warn_once(&self) -> Arc<WarnOnce> {
        Arc::clone(&self.warn_once)
    }

    /// Registered provider ids.
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}
