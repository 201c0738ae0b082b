//! Cluster domain model.
//!
//! A cluster is one running ensemble of agents with its own isolation,
//! message bus, and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::agent::{AgentSpec, AgentState};
use crate::domain::ports::errors::OrchestratorError;

/// Cluster lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// Isolation and agents are being provisioned.
    Initializing,
    /// All agents spawned; the seed has been published.
    Running,
    /// Graceful shutdown requested; draining in-flight executions.
    Stopping,
    /// Terminal. Isolation cleaned up (worktree branch preserved).
    Stopped,
    /// Terminal failure during the cluster's lifetime.
    Error,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

/// Declarative cluster configuration: the agent ensemble and its wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Human-readable name, used in logs only.
    #[serde(default)]
    pub name: Option<String>,
    pub agents: Vec<AgentSpec>,
}

impl ClusterConfig {
    /// Reject invalid configurations before any side effect.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.agents.is_empty() {
            return Err(OrchestratorError::ConfigInvalid(
                "cluster config declares no agents".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.is_empty() {
                return Err(OrchestratorError::ConfigInvalid(
                    "agent id must not be empty".to_string(),
                ));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(OrchestratorError::ConfigInvalid(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
            if agent.triggers.is_empty() {
                return Err(OrchestratorError::ConfigInvalid(format!(
                    "agent '{}' declares no triggers",
                    agent.id
                )));
            }
        }
        Ok(())
    }
}

/// Options for `Orchestrator::start`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Provision a git worktree from `cwd`.
    pub worktree: bool,
    /// Provision a container bind-mounting `cwd`.
    pub docker: bool,
    /// Source repository / working directory for the sandbox.
    pub cwd: Option<std::path::PathBuf>,
    /// Container image override.
    pub image: Option<String>,
    /// Topic for the seed message; defaults to `ISSUE_OPENED`.
    pub seed_topic: Option<String>,
}

/// Seed payload published on cluster start.
pub type SeedPayload = Value;

/// Generate a cluster id: short, unique, filesystem- and branch-safe.
pub fn generate_cluster_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("c{}", &uuid[..8])
}

/// Read-model snapshot of one agent, for the status footer and tests.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub state: AgentState,
    /// Highest bus sequence the agent has considered.
    pub cursor: u64,
    /// Completed provider runs.
    pub iterations: u32,
    /// Child pid while executing.
    pub child_pid: Option<u32>,
    pub last_error: Option<String>,
}

/// Read-model snapshot of one cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub cluster_id: String,
    pub state: ClusterState,
    pub created_at: DateTime<Utc>,
    /// Number of messages on the bus.
    pub bus_len: u64,
    pub agents: Vec<AgentSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::{AgentAction, AgentHooks, TriggerSpec};

    fn worker(id: &str) -> AgentSpec {
        AgentSpec {
            id: id.to_string(),
            role: String::new(),
            triggers: vec![TriggerSpec {
                topic: "ISSUE_OPENED".to_string(),
                action: AgentAction::Noop,
                condition: None,
            }],
            prompt: String::new(),
            system_preamble: None,
            hooks: AgentHooks::default(),
            timeout_ms: 0,
            use_direct_api: None,
            json_schema: None,
            model_level: None,
            max_retries: 2,
        }
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicates() {
        let empty = ClusterConfig {
            name: None,
            agents: vec![],
        };
        assert!(matches!(
            empty.validate(),
            Err(OrchestratorError::ConfigInvalid(_))
        ));

        let duped = ClusterConfig {
            name: None,
            agents: vec![worker("a"), worker("a")],
        };
        assert!(matches!(
            duped.validate(),
            Err(OrchestratorError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_triggerless_agent() {
        let mut agent = worker("a");
        agent.triggers.clear();
        let config = ClusterConfig {
            name: None,
            agents: vec![agent],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_wired_cluster() {
        let config = ClusterConfig {
            name: Some("pair".to_string()),
            agents: vec![worker("a"), worker("b")],
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cluster_id_shape() {
        let id = generate_cluster_id();
        assert!(id.starts_with('c'));
        assert_eq!(id.len(), 9);
        assert_ne!(id, generate_cluster_id());
    }
}
