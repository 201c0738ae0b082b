//! Isolation record domain model.
//!
//! Each cluster owns at most one execution sandbox: a lightweight git
//! worktree (seconds to provision, branch preserved on teardown) or a
//! container (tens of seconds, fully destroyed on teardown).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directory segment under the OS temp root that holds all cluster worktrees.
pub const WORKTREE_ROOT_SEGMENT: &str = "zeroshot-worktrees";

/// Branch namespace for cluster worktrees.
pub const BRANCH_PREFIX: &str = "zeroshot/";

/// Details of a provisioned git worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeInfo {
    /// Worktree directory, `<tmp>/zeroshot-worktrees/<cluster_id>`.
    pub path: PathBuf,
    /// Branch in the enclosing repo, `zeroshot/<cluster_id>`.
    pub branch: String,
    /// The repository the worktree was carved from.
    pub repo_root: PathBuf,
}

impl WorktreeInfo {
    /// Branch name for a cluster id.
    pub fn branch_for_cluster(cluster_id: &str) -> String {
        format!("{BRANCH_PREFIX}{cluster_id}")
    }

    /// Worktree path for a cluster id under the given temp root.
    pub fn path_for_cluster(tmp_root: &Path, cluster_id: &str) -> PathBuf {
        tmp_root.join(WORKTREE_ROOT_SEGMENT).join(cluster_id)
    }
}

/// Details of a provisioned container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Runtime-assigned container id.
    pub container_id: String,
    /// Image the container was launched from.
    pub image: String,
    /// Host directory bind-mounted into the container.
    pub work_dir: PathBuf,
}

/// The sandbox attached to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IsolationRecord {
    /// Git-worktree sandbox. The branch outlives cleanup.
    Worktree(WorktreeInfo),
    /// Container sandbox. Destroyed entirely on cleanup.
    Container(ContainerInfo),
    /// No isolation; agents run directly in the caller's directory.
    None,
}

impl IsolationRecord {
    /// The working directory agents of this cluster execute in.
    ///
    /// `None` for the no-isolation case (the caller's cwd applies).
    pub fn work_dir(&self) -> Option<&Path> {
        match self {
            Self::Worktree(info) => Some(&info.path),
            Self::Container(info) => Some(&info.work_dir),
            Self::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}
