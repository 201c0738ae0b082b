//! Container engine adapters.

pub mod docker_cli;

pub use docker_cli::DockerCli;
