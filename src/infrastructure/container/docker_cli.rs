//! Docker CLI container runtime.
//!
//! Shells out to `docker` (falling back to `podman` when docker is absent)
//! for launch, exec, and teardown. Containers are long-running (`sleep
//! infinity`) with the cluster work directory bind-mounted at the same path
//! inside, so agent cwd handling is identical in both isolation modes.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::ports::container::{ContainerRuntime, ExecOutcome};
use crate::domain::ports::errors::OrchestratorError;

/// Container runtime over the docker CLI.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Prefer docker, fall back to podman; `None` when neither resolves.
    pub async fn detect() -> Option<Self> {
        for candidate in ["docker", "podman"] {
            let available = Command::new(candidate)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if available {
                return Some(Self {
                    binary: candidate.to_string(),
                });
            }
        }
        None
    }

    async fn run(&self, args: &[&str]) -> Result<ExecOutcome, OrchestratorError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                OrchestratorError::IsolationFailed(format!("{} {}: {e}", self.binary, args[0]))
            })?;

        Ok(ExecOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn launch(
        &self,
        name: &str,
        image: &str,
        work_dir: &Path,
    ) -> Result<String, OrchestratorError> {
        let mount = format!("{}:{}", work_dir.display(), work_dir.display());
        let work_dir_str = work_dir.display().to_string();
        let outcome = self
            .run(&[
                "run",
                "-d",
                "--name",
                name,
                "-v",
                &mount,
                "-w",
                &work_dir_str,
                image,
                "sleep",
                "infinity",
            ])
            .await?;

        if !outcome.success() {
            return Err(OrchestratorError::IsolationFailed(format!(
                "container launch failed: {}",
                outcome.stderr.trim()
            )));
        }

        let container_id = outcome.stdout.trim().to_string();
        info!(container_id = %container_id, image, "Container launched");
        Ok(container_id)
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &[String],
    ) -> Result<ExecOutcome, OrchestratorError> {
        let mut args = vec!["exec", container_id];
        args.extend(command.iter().map(String::as_str));
        debug!(container_id, ?command, "Exec in container");
        self.run(&args).await
    }

    async fn stop_and_remove(&self, container_id: &str) {
        match self.run(&["rm", "-f", container_id]).await {
            Ok(outcome) if !outcome.success() => {
                warn!(
                    container_id,
                    stderr = %outcome.stderr.trim(),
                    "Container removal reported failure"
                );
            }
            Err(e) => {
                warn!(container_id, error = %e, "Container removal errored");
            }
            Ok(_) => {}
        }
    }

    async fn is_running(&self, container_id: &str) -> bool {
        self.run(&["inspect", "-f", "{{.State.Running}}", container_id])
            .await
            .map(|outcome| outcome.success() && outcome.stdout.trim() == "true")
            .unwrap_or(false)
    }
}
