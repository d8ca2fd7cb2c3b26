//! CLI command implementations.

pub mod build;
pub mod ci;

use anyhow::{Context, Result};
use mocbot_ci_config::load_pipeline;
use mocbot_ci_core::secret::LocalSecretStore;
use mocbot_ci_core::{PipelineDefinition, SecretStore, SourceDir};
use mocbot_ci_executor::{DockerImagePublisher, DockerNodeCi};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::settings::Settings;

/// Result of a command, as printed with `--json`.
#[derive(Debug, Serialize)]
pub struct Outcome<'a> {
    pub operation: &'a str,
    pub output: &'a str,
}

/// Print a command's result to stdout.
pub fn print(outcome: &Outcome<'_>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        print!("{}", outcome.output);
        if !outcome.output.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

/// Open the source tree, resolve the secret and wire the Docker delegates.
pub async fn pipeline(settings: &Settings) -> Result<PipelineDefinition> {
    let source = SourceDir::open(&settings.source)?;
    let secret = LocalSecretStore
        .resolve(&settings.secret)
        .await
        .context("Failed to resolve secret")?;

    let node_ci = DockerNodeCi::new().context("Failed to connect to Docker")?;
    let publisher = DockerImagePublisher::new(&settings.registry)
        .context("Failed to connect to Docker")?
        .with_username(settings.registry_username.clone());

    let pipeline = PipelineDefinition::new(
        &settings.repository_name,
        source,
        secret,
        Arc::new(node_ci),
        Arc::new(publisher),
    )?;
    Ok(pipeline)
}

pub fn validate(path: &Path, json: bool) -> Result<()> {
    let config = load_pipeline(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("Configuration is valid");
        if let Some(name) = &config.repository_name {
            println!("  pipeline: {}", name);
        }
        if let Some(registry) = &config.registry {
            println!("  registry: {}", registry.address);
        }
    }
    Ok(())
}
