//! Command handlers for the CLI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::warn;

use crate::domain::models::cluster::{ClusterConfig, StartOptions};
use crate::domain::models::settings::Settings;
use crate::infrastructure::config::RuntimeEnv;
use crate::infrastructure::container::DockerCli;
use crate::infrastructure::providers::{probe_capabilities, ProviderRegistry};
use crate::services::{IsolationManager, Orchestrator, ProcessMetricsProbe};

use super::display;

/// How often the status footer refreshes.
const FOOTER_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on a single `run` invocation.
const RUN_DEADLINE: Duration = Duration::from_secs(3600);

/// `zeroshot run`: drive one cluster to a terminal state.
#[allow(clippy::too_many_arguments)]
pub async fn handle_run(
    settings: Settings,
    env: &RuntimeEnv,
    config_path: PathBuf,
    seed: Option<String>,
    worktree: bool,
    docker: bool,
    cwd: Option<PathBuf>,
    image: Option<String>,
    quiet: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading cluster config {}", config_path.display()))?;
    let config: ClusterConfig =
        serde_yaml::from_str(&raw).context("parsing cluster config yaml")?;

    let seed: Value = match seed {
        Some(text) => serde_json::from_str(&text).context("parsing --seed json")?,
        None => Value::Object(serde_json::Map::new()),
    };

    let container_runtime: Arc<dyn crate::domain::ports::container::ContainerRuntime> = if docker {
        Arc::new(
            DockerCli::detect()
                .await
                .context("container isolation requested but no docker/podman found")?,
        )
    } else {
        Arc::new(DockerCli::new())
    };

    let isolation = Arc::new(IsolationManager::new(container_runtime));
    let providers = Arc::new(ProviderRegistry::from_settings(&settings, env).await);
    let orchestrator = Orchestrator::new(settings, isolation, providers);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("static template"));
    spinner.set_message("starting cluster...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let cwd = cwd.map_or_else(std::env::current_dir, Ok)?;
    let started = orchestrator
        .start(
            config,
            seed,
            StartOptions {
                worktree,
                docker,
                cwd: Some(cwd),
                image,
                seed_topic: None,
            },
        )
        .await?;
    spinner.finish_with_message(format!("cluster {} running", started.cluster_id));

    // Ctrl-C kills every cluster instead of orphaning child processes.
    let ctrlc_orchestrator = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, killing clusters");
            ctrlc_orchestrator.kill_all().await;
        }
    });

    let probe = Arc::new(ProcessMetricsProbe::new());
    if !quiet {
        spawn_footer(
            Arc::clone(&orchestrator),
            started.cluster_id.clone(),
            Arc::clone(&probe),
        );
    }

    let final_state = orchestrator
        .await_terminal(&started.cluster_id, RUN_DEADLINE)
        .await;

    if let Some(status) = orchestrator.cluster_status(&started.cluster_id).await {
        let samples = vec![None; status.agents.len()];
        println!("{}", display::cluster_table(&status, &samples));
        println!(
            "cluster {} finished in state {}",
            status.cluster_id,
            display::styled_state(status.state.as_str())
        );
    }

    match final_state {
        Some(state) if state.is_terminal() => Ok(()),
        _ => {
            orchestrator.kill_all().await;
            anyhow::bail!("cluster did not reach a terminal state within the deadline")
        }
    }
}

/// Periodic status footer: cluster reads plus metrics samples.
fn spawn_footer(
    orchestrator: Arc<Orchestrator>,
    cluster_id: String,
    probe: Arc<ProcessMetricsProbe>,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(FOOTER_INTERVAL).await;
            let Some(status) = orchestrator.cluster_status(&cluster_id).await else {
                break;
            };
            if status.state.is_terminal() {
                break;
            }

            let mut lines = vec![display::footer_line(&status)];
            for agent in &status.agents {
                if let Some(pid) = agent.child_pid {
                    if let Some(sample) = probe.sample(pid, Duration::from_millis(250)).await {
                        lines.push(format!(
                            "  {} pid {} · {:.1}% cpu · {} rss",
                            agent.id,
                            pid,
                            sample.cpu_percent,
                            sample.rss_bytes / (1024 * 1024)
                        ));
                    }
                }
            }
            eprintln!("{}", lines.join("\n"));
        }
    });
}

/// `zeroshot capabilities`: probe and print the provider matrix.
pub async fn handle_capabilities(settings: Settings, env: &RuntimeEnv) -> Result<()> {
    let (binary, leading_args) = env
        .claude_command
        .as_deref()
        .and_then(crate::infrastructure::providers::ClaudeCliProvider::split_command_override)
        .unwrap_or_else(|| (settings.provider.claude_path.clone(), Vec::new()));

    let caps = probe_capabilities(&binary, &leading_args).await;
    println!("{}", display::capabilities_table("claude", &caps));
    Ok(())
}
