//! Container runtime port.
//!
//! Seam between the isolation manager and the container engine so the
//! install-retry logic is testable without docker on the host.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::ports::errors::OrchestratorError;

/// Result of one exec inside a container.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Minimal container engine surface the isolation manager needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a long-running container named `name` from `image` with
    /// `work_dir` bind-mounted at the same path inside. Returns the
    /// runtime-assigned container id.
    async fn launch(
        &self,
        name: &str,
        image: &str,
        work_dir: &Path,
    ) -> Result<String, OrchestratorError>;

    /// Run a command inside the container. An `Err` here means the exec
    /// channel itself failed; callers treat it like a non-zero exit.
    async fn exec(
        &self,
        container_id: &str,
        command: &[String],
    ) -> Result<ExecOutcome, OrchestratorError>;

    /// Stop and remove the container. Best-effort; never errors.
    async fn stop_and_remove(&self, container_id: &str);

    /// Whether the container currently exists and is running.
    async fn is_running(&self, container_id: &str) -> bool;
}
