//! Service layer
//!
//! The orchestrator core: message bus, isolation manager, agent runtime,
//! supervisor, metrics probe, and the shared retry policy.

pub mod agent_runtime;
pub mod isolation_manager;
pub mod message_bus;
pub mod orchestrator;
pub mod process_metrics;
pub mod retry;

pub use agent_runtime::{AgentContext, AgentRuntime, ShutdownSignal};
pub use isolation_manager::{ContainerOptions, InstallReport, IsolationManager};
pub use message_bus::{MessageBus, SubscriberCallback, SubscriptionId};
pub use orchestrator::{ClusterHandle, Orchestrator, StartedCluster};
pub use process_metrics::{ProcessMetricsProbe, ProcessSample};
pub use retry::{RetryPolicy, RetryReport};
