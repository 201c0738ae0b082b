//! Zeroshot: a multi-agent cluster orchestrator.
//!
//! Runs clusters of cooperating AI-assistant subprocesses against a code
//! repository. Each cluster gets its own sandbox (git worktree or
//! container), an ordered topic-indexed message bus, and a set of agents
//! that react to bus events by invoking a provider CLI (or the provider
//! API directly) and publishing further events.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
