//! Run settings: command-line flags layered over `mocbot.kdl`.

use anyhow::{Context, Result, bail};
use mocbot_ci_config::{DEFAULT_CONFIG_FILE, PipelineConfig, load_pipeline};
use mocbot_ci_core::SecretRef;
use mocbot_ci_core::pipeline::DEFAULT_ENVIRONMENT;
use mocbot_ci_executor::publish::DEFAULT_REGISTRY;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Secret used when neither flags nor config name one.
pub const DEFAULT_SECRET: &str = "env:INFISICAL_CLIENT_SECRET";

/// Values given on the command line (or their environment variables).
#[derive(Debug, Default)]
pub struct Flags {
    pub config: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub repo_name: Option<String>,
    pub secret: Option<String>,
    pub registry: Option<String>,
    pub registry_username: Option<String>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub source: PathBuf,
    pub repository_name: String,
    pub secret: SecretRef,
    pub registry: String,
    pub registry_username: Option<String>,
    /// Environment for `build-and-push` when `--env` is not given.
    pub environment: String,
}

impl Settings {
    /// Read the config file (explicit, or `./mocbot.kdl` if present) and
    /// merge flags over it.
    pub fn load(flags: Flags) -> Result<Self> {
        let config = match &flags.config {
            Some(path) => load_pipeline(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    load_pipeline(default)
                        .with_context(|| format!("Failed to load config file: {}", DEFAULT_CONFIG_FILE))?
                } else {
                    PipelineConfig::default()
                }
            }
        };
        debug!(?config, "Loaded pipeline config");
        Self::merge(flags, config)
    }

    /// Flags win over config values, which win over defaults.
    pub fn merge(flags: Flags, config: PipelineConfig) -> Result<Self> {
        let Some(repository_name) = flags.repo_name.or(config.repository_name) else {
            bail!(
                "missing repository name: pass --repo-name or set `pipeline \"<name>\"` in {}",
                DEFAULT_CONFIG_FILE
            );
        };

        let secret = match flags.secret {
            Some(raw) => raw
                .parse::<SecretRef>()
                .with_context(|| format!("Invalid --secret value: {}", raw))?,
            None => match config.secret {
                Some(secret) => secret,
                None => DEFAULT_SECRET.parse()?,
            },
        };

        let (config_registry, config_username) = match config.registry {
            Some(registry) => (Some(registry.address), registry.username),
            None => (None, None),
        };

        Ok(Self {
            source: flags
                .source
                .or(config.source)
                .unwrap_or_else(|| PathBuf::from(".")),
            repository_name,
            secret,
            registry: flags
                .registry
                .or(config_registry)
                .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
            registry_username: flags.registry_username.or(config_username),
            environment: config
                .environment
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocbot_ci_config::RegistryConfig;

    fn config() -> PipelineConfig {
        PipelineConfig {
            repository_name: Some("mocbot-join-sound-uploader".to_string()),
            source: Some(PathBuf::from("/srv/app")),
            secret: Some(SecretRef::File(PathBuf::from("/run/secrets/client"))),
            registry: Some(RegistryConfig {
                address: "registry.example.com/mocbot".to_string(),
                username: Some("ci".to_string()),
            }),
            environment: Some("staging".to_string()),
        }
    }

    #[test]
    fn test_defaults() {
        let flags = Flags {
            repo_name: Some("mocbot-join-sound-uploader".to_string()),
            ..Default::default()
        };
        let settings = Settings::merge(flags, PipelineConfig::default()).unwrap();

        assert_eq!(settings.source, PathBuf::from("."));
        assert_eq!(
            settings.secret,
            SecretRef::Env("INFISICAL_CLIENT_SECRET".to_string())
        );
        assert_eq!(settings.registry, DEFAULT_REGISTRY);
        assert_eq!(settings.registry_username, None);
        assert_eq!(settings.environment, "prod");
    }

    #[test]
    fn test_config_values_used() {
        let settings = Settings::merge(Flags::default(), config()).unwrap();

        assert_eq!(settings.repository_name, "mocbot-join-sound-uploader");
        assert_eq!(settings.source, PathBuf::from("/srv/app"));
        assert_eq!(
            settings.secret,
            SecretRef::File(PathBuf::from("/run/secrets/client"))
        );
        assert_eq!(settings.registry, "registry.example.com/mocbot");
        assert_eq!(settings.registry_username.as_deref(), Some("ci"));
        assert_eq!(settings.environment, "staging");
    }

    #[test]
    fn test_flags_override_config() {
        let flags = Flags {
            source: Some(PathBuf::from("/tmp/src")),
            repo_name: Some("other".to_string()),
            secret: Some("env:REGISTRY_TOKEN".to_string()),
            registry: Some("localhost:5000".to_string()),
            registry_username: Some("me".to_string()),
            ..Default::default()
        };
        let settings = Settings::merge(flags, config()).unwrap();

        assert_eq!(settings.repository_name, "other");
        assert_eq!(settings.source, PathBuf::from("/tmp/src"));
        assert_eq!(settings.secret, SecretRef::Env("REGISTRY_TOKEN".to_string()));
        assert_eq!(settings.registry, "localhost:5000");
        assert_eq!(settings.registry_username.as_deref(), Some("me"));
    }

    #[test]
    fn test_missing_repository_name() {
        let err = Settings::merge(Flags::default(), PipelineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("missing repository name"));
    }

    #[test]
    fn test_invalid_secret_flag() {
        let flags = Flags {
            repo_name: Some("x".to_string()),
            secret: Some("vault:kv".to_string()),
            ..Default::default()
        };
        assert!(Settings::merge(flags, PipelineConfig::default()).is_err());
    }

    #[test]
    fn test_load_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci.kdl");
        std::fs::write(&path, "pipeline \"mocbot-join-sound-uploader\"\nsource \"app\"\n").unwrap();

        let settings = Settings::load(Flags {
            config: Some(path),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(settings.source, dir.path().join("app"));
    }

    #[test]
    fn test_load_missing_explicit_config() {
        let result = Settings::load(Flags {
            config: Some(PathBuf::from("/nonexistent/mocbot.kdl")),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
