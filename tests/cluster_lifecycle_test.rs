//! End-to-end cluster lifecycle: worker + completion detector over a real
//! worktree, with a scripted provider standing in for the external CLI.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use zeroshot::domain::models::agent::{AgentAction, AgentHooks, AgentSpec, TriggerSpec};
use zeroshot::domain::models::cluster::{ClusterConfig, ClusterState, StartOptions};
use zeroshot::domain::models::message::{topics, MessageQuery};
use zeroshot::domain::models::provider::{
    CliInvocation, InvocationSpec, ModelLevel, ResolvedModel,
};
use zeroshot::domain::models::settings::Settings;
use zeroshot::domain::ports::container::{ContainerRuntime, ExecOutcome};
use zeroshot::domain::ports::errors::OrchestratorError;
use zeroshot::domain::ports::provider::{EventStreamParser, Provider, ProviderCapabilities};
use zeroshot::infrastructure::providers::{JsonLineParser, ProviderRegistry};
use zeroshot::services::{IsolationManager, Orchestrator};

/// Provider that records each context and emits one canned success line.
struct RecordingProvider {
    contexts: Mutex<Vec<String>>,
    capabilities: ProviderCapabilities,
}

impl RecordingProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(Vec::new()),
            capabilities: ProviderCapabilities::all_true(),
        })
    }

    fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn provider_id(&self) -> &str {
        "recording"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn resolve_model(&self, _level: ModelLevel) -> ResolvedModel {
        ResolvedModel {
            model_id: "scripted".to_string(),
            reasoning_effort: None,
        }
    }

    fn build_invocation(&self, spec: &InvocationSpec) -> Result<CliInvocation, OrchestratorError> {
        self.contexts.lock().unwrap().push(spec.context.clone());
        let script = concat!(
            r#"echo '{"type":"text","text":"patched"}'; "#,
            r#"echo '{"type":"result","success":true,"input_tokens":5,"output_tokens":2}'"#,
        );
        Ok(CliInvocation {
            binary: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: std::collections::HashMap::new(),
            stdin: None,
        })
    }

    fn event_parser(&self) -> Box<dyn EventStreamParser> {
        Box::new(JsonLineParser::new())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Inert container runtime; these tests only use worktree isolation.
struct NullRuntime;

#[async_trait]
impl ContainerRuntime for NullRuntime {
    async fn launch(
        &self,
        _name: &str,
        _image: &str,
        _work_dir: &Path,
    ) -> Result<String, OrchestratorError> {
        Err(OrchestratorError::IsolationFailed(
            "no container runtime in tests".to_string(),
        ))
    }

    async fn exec(
        &self,
        _container_id: &str,
        _command: &[String],
    ) -> Result<ExecOutcome, OrchestratorError> {
        Err(OrchestratorError::IsolationFailed("no exec".to_string()))
    }

    async fn stop_and_remove(&self, _container_id: &str) {}

    async fn is_running(&self, _container_id: &str) -> bool {
        false
    }
}

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let repo = dir.path().to_path_buf();
    git(&repo, &["init", "-q", "-b", "main"]);
    git(&repo, &["config", "user.email", "test@example.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    std::fs::write(repo.join("test.txt"), "seed file\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "initial"]);
    (dir, repo)
}

/// Worker reacts to the seed and publishes completion; the detector stops
/// the cluster on completion.
fn worker_and_detector_config() -> ClusterConfig {
    ClusterConfig {
        name: Some("single-worker".to_string()),
        agents: vec![
            AgentSpec {
                id: "worker".to_string(),
                role: String::new(),
                triggers: vec![TriggerSpec {
                    topic: topics::ISSUE_OPENED.to_string(),
                    action: AgentAction::ExecuteTask,
                    condition: None,
                }],
                prompt: "Resolve this issue: {{payload.text}}".to_string(),
                system_preamble: None,
                hooks: AgentHooks {
                    on_complete: Some(AgentAction::PublishMessage {
                        topic: topics::TASK_COMPLETE.to_string(),
                        payload: json!({}),
                    }),
                    on_error: None,
                },
                timeout_ms: 30_000,
                use_direct_api: None,
                json_schema: None,
                model_level: None,
                max_retries: 0,
            },
            AgentSpec {
                id: "completion-detector".to_string(),
                role: "orchestrator".to_string(),
                triggers: vec![TriggerSpec {
                    topic: topics::TASK_COMPLETE.to_string(),
                    action: AgentAction::StopCluster,
                    condition: None,
                }],
                prompt: String::new(),
                system_preamble: None,
                hooks: AgentHooks::default(),
                timeout_ms: 0,
                use_direct_api: None,
                json_schema: None,
                model_level: None,
                max_retries: 0,
            },
        ],
    }
}

fn orchestrator_with(provider: Arc<RecordingProvider>) -> Arc<Orchestrator> {
    let settings = Settings {
        grace_period_ms: 2_000,
        ..Settings::default()
    };
    let isolation = Arc::new(IsolationManager::new(Arc::new(NullRuntime)));
    let providers = Arc::new(ProviderRegistry::with_providers(
        vec![provider as Arc<dyn Provider>],
        None,
    ));
    Orchestrator::new(settings, isolation, providers)
}

#[tokio::test]
async fn single_worker_run_reaches_stopped_via_detector() {
    let (_guard, repo) = init_repo();
    let provider = RecordingProvider::new();
    let orchestrator = orchestrator_with(Arc::clone(&provider));

    let start = Instant::now();
    let started = orchestrator
        .start(
            worker_and_detector_config(),
            json!({ "text": "X" }),
            StartOptions {
                worktree: true,
                docker: false,
                cwd: Some(repo.clone()),
                image: None,
                seed_topic: None,
            },
        )
        .await
        .unwrap();

    // Worktree start is fast.
    assert!(start.elapsed() < Duration::from_secs(5));

    let final_state = orchestrator
        .await_terminal(&started.cluster_id, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(final_state, ClusterState::Stopped);

    let cluster = orchestrator.get_cluster(&started.cluster_id).await.unwrap();
    let opened = cluster.bus.query(&MessageQuery::topic(topics::ISSUE_OPENED));
    let completed = cluster.bus.query(&MessageQuery::topic(topics::TASK_COMPLETE));
    let stops = cluster.bus.query(&MessageQuery::topic(topics::CLUSTER_STOP));
    assert!(!opened.is_empty());
    assert!(!completed.is_empty());
    assert!(!stops.is_empty());
    assert_eq!(stops[0].publisher, "completion-detector");

    // Provider ran exactly once, with the seed payload substituted in.
    let contexts = provider.contexts();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].contains('X'));

    // Worktree is gone, branch preserved.
    let worktree = orchestrator
        .isolation()
        .get_worktree_info(&started.cluster_id)
        .await;
    assert!(worktree.is_none());
    let branch = format!("zeroshot/{}", started.cluster_id);
    let branches = Command::new("git")
        .arg("-C")
        .arg(&repo)
        .args(["branch", "--list", branch.as_str()])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&branches.stdout).contains(&branch));
}

/// Provider whose binary is "missing": availability always reports false.
struct UnavailableProvider {
    capabilities: ProviderCapabilities,
}

#[async_trait]
impl Provider for UnavailableProvider {
    fn provider_id(&self) -> &str {
        "missing"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn resolve_model(&self, _level: ModelLevel) -> ResolvedModel {
        ResolvedModel {
            model_id: "missing".to_string(),
            reasoning_effort: None,
        }
    }

    fn build_invocation(
        &self,
        _spec: &InvocationSpec,
    ) -> Result<CliInvocation, OrchestratorError> {
        Err(OrchestratorError::ProviderUnavailable(
            "missing binary".to_string(),
        ))
    }

    fn event_parser(&self) -> Box<dyn EventStreamParser> {
        Box::new(JsonLineParser::new())
    }

    async fn is_available(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn start_rejects_unavailable_provider_before_provisioning() {
    let (_guard, repo) = init_repo();
    let isolation = Arc::new(IsolationManager::new(Arc::new(NullRuntime)));
    let providers = Arc::new(ProviderRegistry::with_providers(
        vec![Arc::new(UnavailableProvider {
            capabilities: ProviderCapabilities::all_true(),
        }) as Arc<dyn Provider>],
        None,
    ));
    let orchestrator = Orchestrator::new(Settings::default(), isolation, providers);

    let err = orchestrator
        .start(
            worker_and_detector_config(),
            json!({ "text": "X" }),
            StartOptions {
                worktree: true,
                docker: false,
                cwd: Some(repo.clone()),
                image: None,
                seed_topic: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::ProviderUnavailable(_)));
    assert!(orchestrator.cluster_ids().await.is_empty());

    // Nothing was provisioned: no cluster branch exists in the repo.
    let branches = Command::new("git")
        .arg("-C")
        .arg(&repo)
        .args(["branch", "--list", "zeroshot/*"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&branches.stdout).trim().is_empty());
}

#[tokio::test]
async fn start_rejects_non_git_cwd_without_registering() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new();
    let orchestrator = orchestrator_with(provider);

    let err = orchestrator
        .start(
            worker_and_detector_config(),
            json!({ "text": "X" }),
            StartOptions {
                worktree: true,
                docker: false,
                cwd: Some(dir.path().to_path_buf()),
                image: None,
                seed_topic: None,
            },
        )
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("git") || message.contains("repository"));
    assert!(orchestrator.cluster_ids().await.is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_side_effects() {
    let provider = RecordingProvider::new();
    let orchestrator = orchestrator_with(Arc::clone(&provider));

    let err = orchestrator
        .start(
            ClusterConfig {
                name: None,
                agents: vec![],
            },
            json!({}),
            StartOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::ConfigInvalid(_)));
    assert!(orchestrator.cluster_ids().await.is_empty());
    assert!(provider.contexts().is_empty());
}

#[tokio::test]
async fn kill_is_immediate_and_idempotent() {
    let (_guard, repo) = init_repo();
    let provider = RecordingProvider::new();
    let orchestrator = orchestrator_with(provider);

    // No detector: the cluster would idle forever without intervention.
    let mut config = worker_and_detector_config();
    config.agents.pop();

    let started = orchestrator
        .start(
            config,
            json!({ "text": "X" }),
            StartOptions {
                worktree: true,
                docker: false,
                cwd: Some(repo),
                image: None,
                seed_topic: None,
            },
        )
        .await
        .unwrap();

    orchestrator.kill(&started.cluster_id).await;
    orchestrator.kill(&started.cluster_id).await;

    let cluster = orchestrator.get_cluster(&started.cluster_id).await.unwrap();
    assert_eq!(cluster.state(), ClusterState::Stopped);
}

#[tokio::test]
async fn stop_on_unknown_cluster_is_a_noop() {
    let provider = RecordingProvider::new();
    let orchestrator = orchestrator_with(provider);

    orchestrator.stop("no-such-cluster").await;
    orchestrator.kill("no-such-cluster").await;
    assert!(orchestrator.get_cluster("no-such-cluster").await.is_none());
}

#[tokio::test]
async fn status_snapshot_reflects_agents() {
    let (_guard, repo) = init_repo();
    let provider = RecordingProvider::new();
    let orchestrator = orchestrator_with(provider);

    let started = orchestrator
        .start(
            worker_and_detector_config(),
            json!({ "text": "X" }),
            StartOptions {
                worktree: true,
                docker: false,
                cwd: Some(repo),
                image: None,
                seed_topic: None,
            },
        )
        .await
        .unwrap();

    let status = orchestrator
        .cluster_status(&started.cluster_id)
        .await
        .unwrap();
    assert_eq!(status.cluster_id, started.cluster_id);
    assert_eq!(status.agents.len(), 2);
    assert!(status.agents.iter().any(|a| a.id == "worker"));

    orchestrator
        .await_terminal(&started.cluster_id, Duration::from_secs(30))
        .await;
}
