//! Orchestrator supervisor.
//!
//! Top-level lifecycle owner: starts clusters (isolation, bus, agents,
//! seed), watches the reserved `CLUSTER_STOP` topic through the shutdown
//! detector, and tears clusters down gracefully (`stop`, with a grace
//! window) or forcefully (`kill`). Cluster registry mutations happen only
//! here, behind one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::domain::models::agent::AgentSpec;
use crate::domain::models::cluster::{
    generate_cluster_id, ClusterConfig, ClusterState, ClusterStatus, StartOptions,
};
use crate::domain::models::isolation::IsolationRecord;
use crate::domain::models::message::{topics, ORCHESTRATOR_PUBLISHER};
use crate::domain::models::settings::Settings;
use crate::domain::ports::errors::OrchestratorError;
use crate::infrastructure::providers::ProviderRegistry;

use super::agent_runtime::{AgentContext, AgentRuntime, ShutdownSignal};
use super::isolation_manager::{ContainerOptions, IsolationManager};
use super::message_bus::MessageBus;

/// Returned by [`Orchestrator::start`].
#[derive(Debug, Clone)]
pub struct StartedCluster {
    pub cluster_id: String,
}

/// One registered cluster.
pub struct ClusterHandle {
    pub id: String,
    pub config: ClusterConfig,
    pub bus: Arc<MessageBus>,
    created_at: DateTime<Utc>,
    state: StdMutex<ClusterState>,
    agents: Vec<Arc<AgentRuntime>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<ShutdownSignal>,
}

impl ClusterHandle {
    pub fn state(&self) -> ClusterState {
        *self.state.lock().expect("cluster state lock poisoned")
    }

    fn set_state(&self, next: ClusterState) {
        let mut state = self.state.lock().expect("cluster state lock poisoned");
        debug!(cluster_id = %self.id, from = state.as_str(), to = next.as_str(), "Cluster state transition");
        *state = next;
    }

    /// Move to `stopping` exactly once; false when someone else already did.
    fn begin_stopping(&self) -> bool {
        let mut state = self.state.lock().expect("cluster state lock poisoned");
        if matches!(*state, ClusterState::Stopping) || state.is_terminal() {
            return false;
        }
        *state = ClusterState::Stopping;
        true
    }

    /// Read-model snapshot for the status footer and tests.
    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            cluster_id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            bus_len: self.bus.len(),
            agents: self.agents.iter().map(|a| a.snapshot()).collect(),
        }
    }
}

/// The supervisor.
pub struct Orchestrator {
    settings: Settings,
    isolation: Arc<IsolationManager>,
    providers: Arc<ProviderRegistry>,
    clusters: RwLock<HashMap<String, Arc<ClusterHandle>>>,
    stop_feed: mpsc::UnboundedSender<String>,
}

impl Orchestrator {
    /// Build the supervisor and spawn its shutdown detector task.
    pub fn new(
        settings: Settings,
        isolation: Arc<IsolationManager>,
        providers: Arc<ProviderRegistry>,
    ) -> Arc<Self> {
        let (stop_feed, stop_rx) = mpsc::unbounded_channel();

        let orchestrator = Arc::new(Self {
            settings,
            isolation,
            providers,
            clusters: RwLock::new(HashMap::new()),
            stop_feed,
        });

        Self::spawn_shutdown_detector(Arc::downgrade(&orchestrator), stop_rx);
        orchestrator
    }

    /// Consume `CLUSTER_STOP` sightings and run graceful stops.
    ///
    /// Racing publishers are harmless: the first message in bus order wins
    /// and later ones hit the idempotent `stop`.
    fn spawn_shutdown_detector(
        weak: Weak<Self>,
        mut stop_rx: mpsc::UnboundedReceiver<String>,
    ) {
        tokio::spawn(async move {
            while let Some(cluster_id) = stop_rx.recv().await {
                let Some(orchestrator) = weak.upgrade() else {
                    break;
                };
                info!(cluster_id = %cluster_id, "Shutdown detector observed CLUSTER_STOP");
                orchestrator.stop(&cluster_id).await;
            }
        });
    }

    /// Start a cluster: isolation, bus, agents, seed.
    ///
    /// Isolation-provisioning failures abort the start and leave nothing
    /// registered.
    #[instrument(skip(self, config, seed, options), fields(agents = config.agents.len()))]
    pub async fn start(
        &self,
        config: ClusterConfig,
        seed: Value,
        options: StartOptions,
    ) -> Result<StartedCluster, OrchestratorError> {
        config.validate()?;
        if !config.agents.iter().any(AgentSpec::has_stop_authority) {
            debug!("No stop-authority agent configured; cluster stops only on external request");
        }

        // Provider availability is checked before any side effect so a
        // missing binary aborts start with nothing provisioned or
        // registered.
        let provider = self.providers.default_provider()?;
        if !provider.is_available().await {
            return Err(OrchestratorError::ProviderUnavailable(format!(
                "provider '{}' binary is not runnable",
                provider.provider_id()
            )));
        }
        let direct_api = self.providers.direct_api();

        let cluster_id = {
            let clusters = self.clusters.read().await;
            let mut id = generate_cluster_id();
            while clusters.contains_key(&id) {
                id = generate_cluster_id();
            }
            id
        };

        let record = self.provision_isolation(&cluster_id, &options).await?;
        let work_dir = record
            .work_dir()
            .map(std::path::Path::to_path_buf)
            .or_else(|| options.cwd.clone());

        let bus = Arc::new(MessageBus::new(
            &cluster_id,
            self.settings.bus.mirror_dir.as_ref(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownSignal::Run);

        let mut agents = Vec::with_capacity(config.agents.len());
        let mut handles = Vec::with_capacity(config.agents.len());
        for spec in &config.agents {
            let runtime = AgentRuntime::new(
                spec.clone(),
                AgentContext {
                    cluster_id: cluster_id.clone(),
                    bus: Arc::clone(&bus),
                    provider: Arc::clone(&provider),
                    direct_api: direct_api.clone(),
                    work_dir: work_dir.clone(),
                    default_level: self.settings.provider.default_level,
                    shutdown: shutdown_rx.clone(),
                },
            );
            runtime.attach();
            handles.push(Arc::clone(&runtime).spawn());
            agents.push(runtime);
        }

        let handle = Arc::new(ClusterHandle {
            id: cluster_id.clone(),
            config,
            bus: Arc::clone(&bus),
            created_at: Utc::now(),
            state: StdMutex::new(ClusterState::Initializing),
            agents,
            handles: Mutex::new(handles),
            shutdown_tx,
        });

        self.clusters
            .write()
            .await
            .insert(cluster_id.clone(), Arc::clone(&handle));

        // Shutdown detector wiring: feed the supervisor task on the
        // reserved stop topic.
        let stop_feed = self.stop_feed.clone();
        let detector_id = cluster_id.clone();
        bus.subscribe(
            Some(topics::CLUSTER_STOP.to_string()),
            Arc::new(move |_message| {
                let _ = stop_feed.send(detector_id.clone());
            }),
        );

        let seed_topic = options
            .seed_topic
            .clone()
            .unwrap_or_else(|| topics::ISSUE_OPENED.to_string());
        bus.publish(seed_topic, ORCHESTRATOR_PUBLISHER, seed);

        handle.set_state(ClusterState::Running);
        info!(cluster_id = %cluster_id, "Cluster running");

        Ok(StartedCluster { cluster_id })
    }

    async fn provision_isolation(
        &self,
        cluster_id: &str,
        options: &StartOptions,
    ) -> Result<IsolationRecord, OrchestratorError> {
        if options.worktree {
            let cwd = options.cwd.clone().ok_or_else(|| {
                OrchestratorError::ConfigInvalid(
                    "worktree isolation requires a source directory".to_string(),
                )
            })?;
            let info = self.isolation.create_worktree(cluster_id, &cwd).await?;
            return Ok(IsolationRecord::Worktree(info));
        }

        if options.docker {
            let cwd = options.cwd.clone().ok_or_else(|| {
                OrchestratorError::ConfigInvalid(
                    "container isolation requires a work directory".to_string(),
                )
            })?;
            let image = options
                .image
                .clone()
                .unwrap_or_else(|| self.settings.container.image.clone());
            self.isolation
                .create_container(
                    cluster_id,
                    &ContainerOptions {
                        work_dir: cwd,
                        image,
                    },
                )
                .await?;
            return self
                .isolation
                .record(cluster_id)
                .await
                .ok_or_else(|| {
                    OrchestratorError::IsolationFailed(
                        "container record missing after creation".to_string(),
                    )
                });
        }

        Ok(IsolationRecord::None)
    }

    /// Graceful stop: drain, wait out the grace window, then force.
    ///
    /// Idempotent; unknown cluster ids are a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self, cluster_id: &str) {
        let Some(cluster) = self.get_cluster(cluster_id).await else {
            return;
        };
        if !cluster.begin_stopping() {
            return;
        }

        let _ = cluster.shutdown_tx.send(ShutdownSignal::Drain);
        let grace = Duration::from_millis(self.settings.grace_period_ms);
        self.reap_agents(&cluster, grace).await;

        self.isolation.cleanup(cluster_id).await;
        cluster.set_state(ClusterState::Stopped);
        info!(cluster_id = %cluster_id, "Cluster stopped");
    }

    /// Forceful stop: signal every child process group, clean up, mark
    /// stopped. Worktree branches survive (see the isolation manager).
    #[instrument(skip(self))]
    pub async fn kill(&self, cluster_id: &str) {
        let Some(cluster) = self.get_cluster(cluster_id).await else {
            return;
        };
        // Unlike stop, kill also preempts an in-progress graceful stop.
        if cluster.state().is_terminal() {
            return;
        }
        cluster.set_state(ClusterState::Stopping);

        let _ = cluster.shutdown_tx.send(ShutdownSignal::Kill);
        self.reap_agents(&cluster, Duration::from_secs(2)).await;

        self.isolation.cleanup(cluster_id).await;
        cluster.set_state(ClusterState::Stopped);
        info!(cluster_id = %cluster_id, "Cluster killed");
    }

    /// Kill every registered cluster, concurrently.
    pub async fn kill_all(&self) {
        let ids: Vec<String> = self.clusters.read().await.keys().cloned().collect();
        futures::future::join_all(ids.iter().map(|id| self.kill(id))).await;
    }

    /// Await agent tasks up to `grace`, escalating to kill + abort.
    async fn reap_agents(&self, cluster: &ClusterHandle, grace: Duration) {
        let mut handles = cluster.handles.lock().await;
        let deadline = Instant::now() + grace;

        for handle in handles.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, &mut *handle).await.is_err() {
                warn!(cluster_id = %cluster.id, "Agent outlived grace window, escalating to kill");
                let _ = cluster.shutdown_tx.send(ShutdownSignal::Kill);
                if timeout(Duration::from_secs(2), &mut *handle).await.is_err() {
                    handle.abort();
                }
            }
        }
        handles.clear();
    }

    /// Lookup; `None` for unknown ids.
    pub async fn get_cluster(&self, cluster_id: &str) -> Option<Arc<ClusterHandle>> {
        self.clusters.read().await.get(cluster_id).cloned()
    }

    /// Status snapshot for a cluster.
    pub async fn cluster_status(&self, cluster_id: &str) -> Option<ClusterStatus> {
        Some(self.get_cluster(cluster_id).await?.status())
    }

    /// All registered cluster ids.
    pub async fn cluster_ids(&self) -> Vec<String> {
        self.clusters.read().await.keys().cloned().collect()
    }

    /// Block until the cluster reaches a terminal state, up to `wait`.
    ///
    /// Returns the final observed state, or `None` for unknown ids.
    pub async fn await_terminal(
        &self,
        cluster_id: &str,
        wait: Duration,
    ) -> Option<ClusterState> {
        let cluster = self.get_cluster(cluster_id).await?;
        let deadline = Instant::now() + wait;
        loop {
            let state = cluster.state();
            if state.is_terminal() || Instant::now() >= deadline {
                return Some(state);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// The isolation manager (status surfaces and tests).
    pub fn isolation(&self) -> &Arc<IsolationManager> {
        &self.isolation
    }
}
