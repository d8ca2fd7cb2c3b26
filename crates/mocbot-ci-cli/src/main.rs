//! mocbot CI pipeline CLI.

use clap::{Parser, Subcommand};
use mocbot_ci_core::RunContext;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod settings;

#[derive(Parser)]
#[command(name = "mocbot-ci")]
#[command(about = "CI pipeline for mocbot-join-sound-uploader", long_about = None)]
struct Cli {
    /// Pipeline configuration file (defaults to ./mocbot.kdl when present)
    #[arg(long, env = "MOCBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Source code directory
    #[arg(long, env = "MOCBOT_SOURCE")]
    source: Option<PathBuf>,

    /// Repository (image) name
    #[arg(long, env = "MOCBOT_REPO_NAME")]
    repo_name: Option<String>,

    /// Secret reference: env:NAME or file:PATH
    #[arg(long, env = "MOCBOT_SECRET")]
    secret: Option<String>,

    /// Registry host and namespace to push to
    #[arg(long, env = "MOCBOT_REGISTRY")]
    registry: Option<String>,

    /// Registry username; the secret is used as the password
    #[arg(long, env = "MOCBOT_REGISTRY_USERNAME")]
    registry_username: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and lint the frontend
    Ci,
    /// Build the container image and push it to the registry
    BuildAndPush {
        /// Target environment
        #[arg(long = "env")]
        environment: Option<String>,
        /// Repository name for this push only
        #[arg(long)]
        repository_name: Option<String>,
    },
    /// Validate a pipeline configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = mocbot_ci_config::DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let flags = settings::Flags {
        config: cli.config,
        source: cli.source,
        repo_name: cli.repo_name,
        secret: cli.secret,
        registry: cli.registry,
        registry_username: cli.registry_username,
    };

    match cli.command {
        Commands::Ci => {
            let settings = settings::Settings::load(flags)?;
            commands::ci::run(&settings, &cancellable_context(), cli.json).await
        }
        Commands::BuildAndPush {
            environment,
            repository_name,
        } => {
            let settings = settings::Settings::load(flags)?;
            let ctx = cancellable_context();
            commands::build::run(&settings, &ctx, environment, repository_name, cli.json).await
        }
        Commands::Validate { path } => commands::validate(&path, cli.json),
    }
}

/// A run context cancelled on Ctrl-C.
fn cancellable_context() -> RunContext {
    let (ctx, cancel) = RunContext::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
    ctx
}
