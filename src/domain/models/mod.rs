//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod cluster;
pub mod isolation;
pub mod message;
pub mod provider;
pub mod settings;

pub use agent::{
    AgentAction, AgentHooks, AgentSpec, AgentState, TriggerCondition, TriggerSpec,
};
pub use cluster::{
    generate_cluster_id, AgentSnapshot, ClusterConfig, ClusterState, ClusterStatus, SeedPayload,
    StartOptions,
};
pub use isolation::{ContainerInfo, IsolationRecord, WorktreeInfo};
pub use message::{topics, BusMessage, MessageQuery, ORCHESTRATOR_PUBLISHER};
pub use provider::{
    CliInvocation, InvocationSpec, ModelLevel, OutputFormat, ProviderEvent, ResolvedModel,
    RunOutcome, TokenUsage,
};
pub use settings::{BusSettings, ContainerSettings, LogFormat, LogSettings, ProviderSettings, Settings};
