//! CLI surface.
//!
//! Thin front-end over the supervisor: `run` drives one cluster to a
//! terminal state with a live status footer, `capabilities` prints the
//! probed provider capability matrix.

pub mod commands;
pub mod display;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-agent cluster orchestrator.
#[derive(Debug, Parser)]
#[command(name = "zeroshot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a cluster from a wiring file until it stops.
    Run {
        /// Cluster wiring file (yaml).
        #[arg(short, long)]
        config: PathBuf,

        /// Seed payload as JSON; defaults to an empty object.
        #[arg(short, long)]
        seed: Option<String>,

        /// Isolate the cluster in a git worktree carved from --cwd.
        #[arg(long, conflicts_with = "docker")]
        worktree: bool,

        /// Isolate the cluster in a container bind-mounting --cwd.
        #[arg(long)]
        docker: bool,

        /// Source repository / work directory for the sandbox.
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Container image override.
        #[arg(long)]
        image: Option<String>,

        /// Suppress the periodic status footer.
        #[arg(short, long)]
        quiet: bool,
    },

    /// Probe the provider CLI and print its capability matrix.
    Capabilities,
}
