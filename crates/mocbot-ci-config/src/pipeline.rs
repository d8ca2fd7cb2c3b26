//! Pipeline configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use mocbot_ci_core::SecretRef;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "mocbot.kdl";

/// Construction parameters read from `mocbot.kdl`. Every field is optional;
/// command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Repository (image) name.
    pub repository_name: Option<String>,
    /// Source tree, relative to the config file's directory.
    pub source: Option<PathBuf>,
    /// Where the build secret comes from.
    #[serde(serialize_with = "serialize_secret_ref")]
    pub secret: Option<SecretRef>,
    pub registry: Option<RegistryConfig>,
    /// Default environment for `build-and-push`.
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryConfig {
    /// Registry host and namespace, e.g. `ghcr.io/mocbot`.
    pub address: String,
    /// Username to push with; the secret is the password.
    pub username: Option<String>,
}

fn serialize_secret_ref<S: serde::Serializer>(
    secret: &Option<SecretRef>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(reference) => serializer.serialize_some(&reference.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Read and parse a configuration file. A relative `source` is resolved
/// against the file's directory.
pub fn load_pipeline(path: &Path) -> ConfigResult<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_pipeline(&content)?;

    if let Some(base) = path.parent() {
        config.source = config
            .source
            .map(|source| if source.is_relative() { base.join(source) } else { source });
    }

    Ok(config)
}

/// Parse a pipeline configuration from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<PipelineConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = PipelineConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                let name = required_arg(node, "pipeline name")?;
                set_once(&mut config.repository_name, name, "pipeline")?;
            }
            "source" => {
                let path = required_arg(node, "source path")?;
                set_once(&mut config.source, PathBuf::from(path), "source")?;
            }
            "secret" => {
                let raw = required_arg(node, "secret reference")?;
                let reference =
                    raw.parse::<SecretRef>()
                        .map_err(|e| ConfigError::InvalidValue {
                            field: "secret".to_string(),
                            message: e.to_string(),
                        })?;
                set_once(&mut config.secret, reference, "secret")?;
            }
            "registry" => {
                let registry = RegistryConfig {
                    address: required_arg(node, "registry address")?,
                    username: get_string_prop(node, "username"),
                };
                set_once(&mut config.registry, registry, "registry")?;
            }
            "environment" => {
                let environment = required_arg(node, "environment name")?;
                set_once(&mut config.environment, environment, "environment")?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn set_once<T>(slot: &mut Option<T>, value: T, node: &str) -> ConfigResult<()> {
    if slot.is_some() {
        return Err(ConfigError::Duplicate(node.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

fn required_arg(node: &KdlNode, what: &str) -> ConfigResult<String> {
    get_first_string_arg(node)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingField(what.to_string()))
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
