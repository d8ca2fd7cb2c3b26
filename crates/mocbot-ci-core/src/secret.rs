//! Secret handles and resolution.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{Error, Result};

/// An opaque credential.
///
/// The value is only reachable through [`Secret::expose`]; `Debug` and
/// `Display` print the name with the value redacted.
#[derive(Clone)]
pub struct Secret {
    name: String,
    value: Arc<str>,
}

impl Secret {
    pub fn new(name: impl Into<String>, value: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw secret value. Only hand this to the tool that needs it.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &"***")
            .finish()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=***", self.name)
    }
}

/// Where a secret comes from: `env:NAME`, `file:PATH`, or a bare `NAME`
/// (treated as an environment variable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretRef {
    Env(String),
    File(PathBuf),
}

impl SecretRef {
    /// Short name for the secret, used as its BuildKit secret id.
    pub fn name(&self) -> String {
        match self {
            SecretRef::Env(var) => var.to_lowercase(),
            SecretRef::File(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "secret".to_string()),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Env(var) => write!(f, "env:{var}"),
            SecretRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

impl std::str::FromStr for SecretRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = match s.split_once(':') {
            Some((scheme, rest)) => (scheme, rest),
            None => ("env", s),
        };
        if rest.is_empty() {
            return Err(Error::InvalidInput(format!("empty secret reference: {s:?}")));
        }
        match scheme {
            "env" => Ok(SecretRef::Env(rest.to_string())),
            "file" => Ok(SecretRef::File(PathBuf::from(rest))),
            other => Err(Error::InvalidInput(format!(
                "unsupported secret scheme '{other}' (expected env: or file:)"
            ))),
        }
    }
}

/// Trait for secret resolution backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve a reference to its value.
    async fn resolve(&self, reference: &SecretRef) -> Result<Secret>;
}

/// Resolves secrets from the process environment and local files.
#[derive(Debug, Clone, Default)]
pub struct LocalSecretStore;

#[async_trait]
impl SecretStore for LocalSecretStore {
    async fn resolve(&self, reference: &SecretRef) -> Result<Secret> {
        let value = match reference {
            SecretRef::Env(var) => std::env::var(var)
                .map_err(|_| Error::SecretNotFound(reference.to_string()))?,
            SecretRef::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::SecretNotFound(format!("{reference}: {e}")))?
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        };

        if value.is_empty() {
            return Err(Error::SecretNotFound(format!("{reference} is empty")));
        }

        Ok(Secret::new(reference.name(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_secret_redacted() {
        let secret = Secret::new("infisical_client_secret", "hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert!(!secret.to_string().contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_parse_secret_ref() {
        assert_eq!(
            "env:INFISICAL_CLIENT_SECRET".parse::<SecretRef>().unwrap(),
            SecretRef::Env("INFISICAL_CLIENT_SECRET".to_string())
        );
        assert_eq!(
            "TOKEN".parse::<SecretRef>().unwrap(),
            SecretRef::Env("TOKEN".to_string())
        );
        assert_eq!(
            "file:/run/secrets/token".parse::<SecretRef>().unwrap(),
            SecretRef::File(PathBuf::from("/run/secrets/token"))
        );
        assert!("cmd:echo hi".parse::<SecretRef>().is_err());
        assert!("env:".parse::<SecretRef>().is_err());
    }

    #[test]
    fn test_secret_ref_name() {
        assert_eq!(
            SecretRef::Env("INFISICAL_CLIENT_SECRET".into()).name(),
            "infisical_client_secret"
        );
        assert_eq!(
            SecretRef::File(PathBuf::from("/tmp/Registry.txt")).name(),
            "registry"
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_env() {
        let reference = SecretRef::Env("MOCBOT_CI_TEST_SECRET_THAT_IS_NOT_SET".into());
        let err = LocalSecretStore.resolve(&reference).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_env() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("MOCBOT_CI_TEST_SECRET_ENV", "s3cret") };
        let reference = SecretRef::Env("MOCBOT_CI_TEST_SECRET_ENV".into());
        let secret = LocalSecretStore.resolve(&reference).await.unwrap();
        assert_eq!(secret.expose(), "s3cret");
        assert_eq!(secret.name(), "mocbot_ci_test_secret_env");
    }

    #[tokio::test]
    async fn test_resolve_file_trims_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let reference = SecretRef::File(file.path().to_path_buf());
        let secret = LocalSecretStore.resolve(&reference).await.unwrap();
        assert_eq!(secret.expose(), "from-file");
    }

    #[tokio::test]
    async fn test_resolve_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let reference = SecretRef::File(file.path().to_path_buf());
        let err = LocalSecretStore.resolve(&reference).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_missing_file() {
        let reference = SecretRef::File(PathBuf::from("/nonexistent/mocbot/secret"));
        let err = LocalSecretStore.resolve(&reference).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
    }
}
