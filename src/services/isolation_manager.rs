//! Isolation manager.
//!
//! Provisions and tears down per-cluster sandboxes. Worktree mode carves a
//! git worktree under `<tmp>/zeroshot-worktrees/<cluster_id>` on a branch
//! `zeroshot/<cluster_id>`; the branch survives cleanup so the work can be
//! reviewed or turned into a pull request later. Container mode launches a
//! long-running container with the work directory bind-mounted and runs the
//! ecosystem install command with a bounded retry; install failure is
//! non-fatal.
//!
//! Invariant: at most one active isolation record per cluster id. Creating
//! a sandbox for an id that already has one cleans the prior record first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::isolation::{ContainerInfo, IsolationRecord, WorktreeInfo};
use crate::domain::ports::container::ContainerRuntime;
use crate::domain::ports::errors::OrchestratorError;

use super::retry::RetryPolicy;

/// Options for container provisioning.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Host directory bind-mounted into the container.
    pub work_dir: PathBuf,
    pub image: String,
}

/// Outcome of the in-container install step.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// The command that ran, e.g. `["npm", "install"]`.
    pub command: Vec<String>,
    /// Attempts actually made.
    pub attempts: u32,
    pub success: bool,
}

/// Manages sandbox lifecycles for all clusters in this process.
pub struct IsolationManager {
    records: RwLock<HashMap<String, IsolationRecord>>,
    container_runtime: Arc<dyn ContainerRuntime>,
    install_retry: RetryPolicy,
}

impl IsolationManager {
    pub fn new(container_runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            container_runtime,
            install_retry: RetryPolicy::install(),
        }
    }

    /// Override the install retry schedule (tests).
    pub fn with_install_retry(mut self, policy: RetryPolicy) -> Self {
        self.install_retry = policy;
        self
    }

    /// Create a fresh git worktree for the cluster.
    ///
    /// The worktree lands at `<tmp>/zeroshot-worktrees/<cluster_id>` on a
    /// new branch `zeroshot/<cluster_id>` based at the current HEAD of
    /// `repo_root`. An orphaned directory from a prior run is removed and
    /// pruned first. A git failure is retried once after `worktree prune`.
    #[instrument(skip(self, repo_root), fields(cluster_id = %cluster_id))]
    pub async fn create_worktree(
        &self,
        cluster_id: &str,
        repo_root: &Path,
    ) -> Result<WorktreeInfo, OrchestratorError> {
        ensure_git_repo(repo_root).await?;

        // One active record per id: clean any prior sandbox first.
        self.cleanup(cluster_id).await;

        let path = WorktreeInfo::path_for_cluster(&std::env::temp_dir(), cluster_id);
        let branch = WorktreeInfo::branch_for_cluster(cluster_id);

        if path.exists() {
            debug!(path = %path.display(), "Removing orphaned worktree directory");
            let _ = tokio::fs::remove_dir_all(&path).await;
            let _ = git(repo_root, &["worktree", "prune"]).await;
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OrchestratorError::IsolationFailed(format!("creating worktree parent: {e}"))
            })?;
        }

        if let Err(first_err) = add_worktree(repo_root, &branch, &path).await {
            warn!(error = %first_err, "Worktree creation failed, pruning and retrying");
            let _ = git(repo_root, &["worktree", "prune"]).await;
            add_worktree(repo_root, &branch, &path).await?;
        }

        let info = WorktreeInfo {
            path,
            branch,
            repo_root: repo_root.to_path_buf(),
        };

        info!(
            path = %info.path.display(),
            branch = %info.branch,
            "Worktree created"
        );

        self.records.write().await.insert(
            cluster_id.to_string(),
            IsolationRecord::Worktree(info.clone()),
        );
        Ok(info)
    }

    /// Launch a container for the cluster and run the ecosystem install.
    ///
    /// Install runs only when `work_dir` carries a recognized manifest and
    /// retries on the bounded schedule (3 attempts, 2s/4s sleeps). Exec
    /// channel errors count like non-zero exits. Exhaustion is logged as a
    /// warning and the container is still returned.
    pub async fn create_container(
        &self,
        cluster_id: &str,
        options: &ContainerOptions,
    ) -> Result<String, OrchestratorError> {
        let (container_id, _) = self
            .create_container_with_report(cluster_id, options)
            .await?;
        Ok(container_id)
    }

    /// As [`Self::create_container`], also returning the install report.
    #[instrument(skip(self, options), fields(cluster_id = %cluster_id, image = %options.image))]
    pub async fn create_container_with_report(
        &self,
        cluster_id: &str,
        options: &ContainerOptions,
    ) -> Result<(String, Option<InstallReport>), OrchestratorError> {
        self.cleanup(cluster_id).await;

        let name = format!("zeroshot-{cluster_id}");
        let container_id = self
            .container_runtime
            .launch(&name, &options.image, &options.work_dir)
            .await?;

        let report = match detect_install_command(&options.work_dir) {
            Some(command) => Some(self.run_install(&container_id, command).await),
            None => {
                debug!("No package manifest found, skipping install");
                None
            }
        };

        self.records.write().await.insert(
            cluster_id.to_string(),
            IsolationRecord::Container(ContainerInfo {
                container_id: container_id.clone(),
                image: options.image.clone(),
                work_dir: options.work_dir.clone(),
            }),
        );

        Ok((container_id, report))
    }

    async fn run_install(&self, container_id: &str, command: Vec<String>) -> InstallReport {
        let command_display = command.join(" ");
        info!(command = %command_display, "Running install in container");

        let runtime = Arc::clone(&self.container_runtime);
        let report = self
            .install_retry
            .run(|| {
                let runtime = Arc::clone(&runtime);
                let command = command.clone();
                let container_id = container_id.to_string();
                async move {
                    let outcome = runtime.exec(&container_id, &command).await?;
                    if outcome.success() {
                        Ok(())
                    } else {
                        Err(OrchestratorError::TransientProviderFailure(format!(
                            "exit {}: {}",
                            outcome.exit_code,
                            outcome.stderr.trim()
                        )))
                    }
                }
            })
            .await;

        let success = report.result.is_ok();
        if !success {
            warn!(
                attempts = report.attempts,
                "{command_display} failed after {} attempts; continuing without install",
                report.attempts
            );
        }

        InstallReport {
            command,
            attempts: report.attempts,
            success,
        }
    }

    /// Remove the cluster's worktree registration and directory.
    ///
    /// The branch is preserved. Idempotent: unknown ids and repeat calls
    /// are no-ops; git errors are swallowed after best-effort directory
    /// removal.
    #[instrument(skip(self), fields(cluster_id = %cluster_id))]
    pub async fn cleanup_worktree(&self, cluster_id: &str) {
        let record = {
            let mut records = self.records.write().await;
            match records.get(cluster_id) {
                Some(IsolationRecord::Worktree(_)) => records.remove(cluster_id),
                _ => None,
            }
        };

        let Some(IsolationRecord::Worktree(info)) = record else {
            return;
        };

        let path_str = info.path.display().to_string();
        if let Err(e) = git(
            &info.repo_root,
            &["worktree", "remove", "--force", &path_str],
        )
        .await
        {
            debug!(error = %e, "git worktree remove failed, removing directory directly");
        }
        let _ = tokio::fs::remove_dir_all(&info.path).await;
        let _ = git(&info.repo_root, &["worktree", "prune"]).await;

        info!(
            path = %info.path.display(),
            branch = %info.branch,
            "Worktree cleaned up, branch preserved"
        );
    }

    /// Stop and remove the cluster's container. Idempotent.
    #[instrument(skip(self), fields(cluster_id = %cluster_id))]
    pub async fn cleanup_container(&self, cluster_id: &str) {
        let record = {
            let mut records = self.records.write().await;
            match records.get(cluster_id) {
                Some(IsolationRecord::Container(_)) => records.remove(cluster_id),
                _ => None,
            }
        };

        if let Some(IsolationRecord::Container(info)) = record {
            self.container_runtime
                .stop_and_remove(&info.container_id)
                .await;
            info!(container_id = %info.container_id, "Container cleaned up");
        }
    }

    /// Clean whatever sandbox the cluster holds.
    pub async fn cleanup(&self, cluster_id: &str) {
        let kind = self.records.read().await.get(cluster_id).cloned();
        match kind {
            Some(IsolationRecord::Worktree(_)) => self.cleanup_worktree(cluster_id).await,
            Some(IsolationRecord::Container(_)) => self.cleanup_container(cluster_id).await,
            Some(IsolationRecord::None) => {
                self.records.write().await.remove(cluster_id);
            }
            None => {}
        }
    }

    /// Worktree details for a cluster, if it holds one.
    pub async fn get_worktree_info(&self, cluster_id: &str) -> Option<WorktreeInfo> {
        match self.records.read().await.get(cluster_id) {
            Some(IsolationRecord::Worktree(info)) => Some(info.clone()),
            _ => None,
        }
    }

    /// Whether the cluster holds a container record.
    pub async fn has_container(&self, cluster_id: &str) -> bool {
        matches!(
            self.records.read().await.get(cluster_id),
            Some(IsolationRecord::Container(_))
        )
    }

    /// The isolation record for a cluster, if any.
    pub async fn record(&self, cluster_id: &str) -> Option<IsolationRecord> {
        self.records.read().await.get(cluster_id).cloned()
    }
}

/// Map a package manifest in `work_dir` to its install command.
pub fn detect_install_command(work_dir: &Path) -> Option<Vec<String>> {
    let candidates: [(&str, &[&str]); 3] = [
        ("package.json", &["npm", "install"]),
        ("Cargo.toml", &["cargo", "fetch"]),
        ("requirements.txt", &["pip", "install", "-r", "requirements.txt"]),
    ];
    for (manifest, command) in candidates {
        if work_dir.join(manifest).exists() {
            return Some(command.iter().map(|s| (*s).to_string()).collect());
        }
    }
    None
}

/// Error when `repo_root` is not inside a git repository.
async fn ensure_git_repo(repo_root: &Path) -> Result<(), OrchestratorError> {
    let status = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .args(["rev-parse", "--git-dir"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| OrchestratorError::IsolationFailed(format!("running git: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(OrchestratorError::NotAGitRepo(
            repo_root.display().to_string(),
        ))
    }
}

/// Attach or create the cluster branch as a worktree at `path`.
async fn add_worktree(
    repo_root: &Path,
    branch: &str,
    path: &Path,
) -> Result<(), OrchestratorError> {
    let branch_ref = format!("refs/heads/{branch}");
    let branch_exists = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .args(["show-ref", "--verify", "--quiet", branch_ref.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);

    let path_str = path.display().to_string();
    if branch_exists {
        // Branch survived an earlier cleanup; attach to it.
        git(repo_root, &["worktree", "add", &path_str, branch]).await
    } else {
        git(
            repo_root,
            &["worktree", "add", "-b", branch, &path_str, "HEAD"],
        )
        .await
    }
}

/// Run a git subcommand in `repo_root`, surfacing stderr on failure.
async fn git(repo_root: &Path, args: &[&str]) -> Result<(), OrchestratorError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| OrchestratorError::IsolationFailed(format!("running git: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(OrchestratorError::IsolationFailed(format!(
            "git {}: {}",
            args.first().copied().unwrap_or(""),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::container::ExecOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Container runtime stub with a scripted install outcome.
    struct MockRuntime {
        exec_calls: AtomicU32,
        /// Exit codes per attempt; the last one repeats.
        exit_codes: Vec<i32>,
        /// When true, exec returns Err instead of an outcome.
        exec_errors: bool,
        removed: AtomicU32,
    }

    impl MockRuntime {
        fn with_exits(exit_codes: Vec<i32>) -> Self {
            Self {
                exec_calls: AtomicU32::new(0),
                exit_codes,
                exec_errors: false,
                removed: AtomicU32::new(0),
            }
        }

        fn erroring() -> Self {
            Self {
                exec_calls: AtomicU32::new(0),
                exit_codes: vec![],
                exec_errors: true,
                removed: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn launch(
            &self,
            name: &str,
            _image: &str,
            _work_dir: &Path,
        ) -> Result<String, OrchestratorError> {
            Ok(format!("id-{name}"))
        }

        async fn exec(
            &self,
            _container_id: &str,
            _command: &[String],
        ) -> Result<ExecOutcome, OrchestratorError> {
            let attempt = self.exec_calls.fetch_add(1, Ordering::SeqCst) as usize;
            if self.exec_errors {
                return Err(OrchestratorError::TransientProviderFailure(
                    "exec channel broken".to_string(),
                ));
            }
            let code = *self
                .exit_codes
                .get(attempt)
                .or(self.exit_codes.last())
                .unwrap_or(&0);
            Ok(ExecOutcome {
                exit_code: code,
                stdout: String::new(),
                stderr: if code == 0 {
                    String::new()
                } else {
                    "boom".to_string()
                },
            })
        }

        async fn stop_and_remove(&self, _container_id: &str) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }

        async fn is_running(&self, _container_id: &str) -> bool {
            true
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, std::time::Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_container_without_manifest_skips_install() {
        let runtime = Arc::new(MockRuntime::with_exits(vec![0]));
        let manager =
            IsolationManager::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>).with_install_retry(fast_retry());
        let dir = tempfile::tempdir().unwrap();

        let (container_id, report) = manager
            .create_container_with_report(
                "c1",
                &ContainerOptions {
                    work_dir: dir.path().to_path_buf(),
                    image: "node:20".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(container_id, "id-zeroshot-c1");
        assert!(report.is_none());
        assert_eq!(runtime.exec_calls.load(Ordering::SeqCst), 0);
        assert!(manager.has_container("c1").await);
    }

    #[tokio::test]
    async fn test_install_retries_then_succeeds() {
        let runtime = Arc::new(MockRuntime::with_exits(vec![1, 1, 0]));
        let manager =
            IsolationManager::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>).with_install_retry(fast_retry());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let (_, report) = manager
            .create_container_with_report(
                "c1",
                &ContainerOptions {
                    work_dir: dir.path().to_path_buf(),
                    image: "node:20".to_string(),
                },
            )
            .await
            .unwrap();

        let report = report.unwrap();
        assert_eq!(report.attempts, 3);
        assert!(report.success);
        assert_eq!(report.command, vec!["npm", "install"]);
    }

    #[tokio::test]
    async fn test_install_exhaustion_is_non_fatal() {
        let runtime = Arc::new(MockRuntime::with_exits(vec![1]));
        let manager =
            IsolationManager::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>).with_install_retry(fast_retry());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let (container_id, report) = manager
            .create_container_with_report(
                "c1",
                &ContainerOptions {
                    work_dir: dir.path().to_path_buf(),
                    image: "node:20".to_string(),
                },
            )
            .await
            .unwrap();

        let report = report.unwrap();
        assert_eq!(report.attempts, 3);
        assert!(!report.success);
        // Container survives install exhaustion.
        assert!(!container_id.is_empty());
        assert!(manager.has_container("c1").await);
    }

    #[tokio::test]
    async fn test_exec_errors_count_like_nonzero_exits() {
        let runtime = Arc::new(MockRuntime::erroring());
        let manager =
            IsolationManager::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>).with_install_retry(fast_retry());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let (_, report) = manager
            .create_container_with_report(
                "c1",
                &ContainerOptions {
                    work_dir: dir.path().to_path_buf(),
                    image: "node:20".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(report.unwrap().attempts, 3);
        assert_eq!(runtime.exec_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cleanup_container_is_idempotent() {
        let runtime = Arc::new(MockRuntime::with_exits(vec![0]));
        let manager =
            IsolationManager::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>).with_install_retry(fast_retry());
        let dir = tempfile::tempdir().unwrap();

        manager
            .create_container(
                "c1",
                &ContainerOptions {
                    work_dir: dir.path().to_path_buf(),
                    image: "node:20".to_string(),
                },
            )
            .await
            .unwrap();

        manager.cleanup_container("c1").await;
        manager.cleanup_container("c1").await;
        manager.cleanup_container("unknown").await;

        assert!(!manager.has_container("c1").await);
        assert_eq!(runtime.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detect_install_command_priority() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_install_command(dir.path()).is_none());

        std::fs::write(dir.path().join("requirements.txt"), "").unwrap();
        assert_eq!(
            detect_install_command(dir.path()).unwrap()[0],
            "pip".to_string()
        );

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(
            detect_install_command(dir.path()).unwrap(),
            vec!["npm".to_string(), "install".to_string()]
        );
    }
}
