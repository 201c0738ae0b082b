//! Provider adapters
//!
//! Capability-gated command builders and stream parsers for external
//! AI-assistant CLIs, plus the direct-API fast path.

pub mod anthropic_api;
pub mod capabilities;
pub mod claude_cli;
pub mod models;
pub mod registry;
pub mod stream;

pub use anthropic_api::AnthropicApiClient;
pub use capabilities::{probe_capabilities, WarnOnce};
pub use claude_cli::{ClaudeCliProvider, CLAUDE_PROVIDER_ID};
pub use models::ModelTable;
pub use registry::ProviderRegistry;
pub use stream::JsonLineParser;
