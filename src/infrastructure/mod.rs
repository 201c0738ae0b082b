//! Infrastructure layer
//!
//! Adapters for the outside world: provider CLIs and APIs, container
//! engines, settings files, and logging.

pub mod config;
pub mod container;
pub mod logging;
pub mod providers;
