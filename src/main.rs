//! Zeroshot CLI entry point.

use anyhow::Result;
use clap::Parser;
use zeroshot::cli::{commands, Cli, Commands};
use zeroshot::infrastructure::config::{RuntimeEnv, SettingsLoader};
use zeroshot::infrastructure::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // The process environment is read exactly once, here.
    let env = RuntimeEnv::capture();
    let settings = SettingsLoader::load(&env)?;
    let _log_guard = logging::init(&settings.log)?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            seed,
            worktree,
            docker,
            cwd,
            image,
            quiet,
        } => {
            commands::handle_run(
                settings, &env, config, seed, worktree, docker, cwd, image, quiet,
            )
            .await
        }
        Commands::Capabilities => commands::handle_capabilities(settings, &env).await,
    }
}
