//! Image build/publish delegate backed by Docker.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::PushImageOptions;
use futures::StreamExt;
use mocbot_ci_core::delegate::{BuildRequest, BuiltImage, ImagePublisher, Step};
use mocbot_ci_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::process::{CommandSpec, run_command};

/// Environment variable carrying the secret into `docker build`.
pub const SECRET_ENV: &str = "MOCBOT_CI_SECRET";

/// Registry namespace images are pushed to unless configured otherwise.
pub const DEFAULT_REGISTRY: &str = "ghcr.io/mocbot";

/// Builds images with the Docker CLI (BuildKit) and pushes them through
/// the Docker API.
///
/// The secret is exposed to the build as a BuildKit secret whose id is the
/// secret's name, and is used as the registry password when a username is
/// configured.
pub struct DockerImagePublisher {
    docker: Docker,
    registry: String,
    username: Option<String>,
    docker_bin: String,
}

impl DockerImagePublisher {
    /// Connect to the local Docker daemon.
    pub fn new(registry: impl Into<String>) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(docker, registry))
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker, registry: impl Into<String>) -> Self {
        Self {
            docker,
            registry: registry.into().trim_end_matches('/').to_string(),
            username: None,
            docker_bin: "docker".to_string(),
        }
    }

    /// Authenticate pushes as `username`.
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Use a different `docker` executable.
    pub fn with_docker_bin(mut self, docker_bin: impl Into<String>) -> Self {
        self.docker_bin = docker_bin.into();
        self
    }

    /// Image name without tag, e.g. `ghcr.io/mocbot/uploader`.
    pub fn image_name(&self, repository_name: &str) -> String {
        if self.registry.is_empty() {
            repository_name.to_string()
        } else {
            format!("{}/{}", self.registry, repository_name)
        }
    }

    /// Tag reference for a build, e.g. `ghcr.io/mocbot/uploader:prod`.
    pub fn reference(&self, request: &BuildRequest) -> String {
        format!(
            "{}:{}",
            self.image_name(&request.repository_name),
            request.opts.environment
        )
    }

    /// Registry host, when the configured registry names one.
    fn registry_host(&self) -> Option<&str> {
        let first = self.registry.split('/').next()?;
        let is_host = first.contains('.') || first.contains(':') || first == "localhost";
        is_host.then_some(first)
    }

    fn build_command(&self, request: &BuildRequest, reference: &str) -> CommandSpec {
        CommandSpec::new(&self.docker_bin)
            .arg("build")
            .arg("--progress=plain")
            .arg("--tag")
            .arg(reference)
            .arg("--build-arg")
            .arg(format!("ENVIRONMENT={}", request.opts.environment))
            .arg("--secret")
            .arg(format!("id={},env={}", request.secret.name(), SECRET_ENV))
            .arg(".")
            .current_dir(request.source.path())
            .env("DOCKER_BUILDKIT", "1")
            .env(SECRET_ENV, request.secret.expose())
    }

    fn credentials(&self, image: &BuiltImage) -> Option<DockerCredentials> {
        let username = self.username.clone()?;
        Some(DockerCredentials {
            username: Some(username),
            password: Some(image.request.secret.expose().to_string()),
            serveraddress: self.registry_host().map(str::to_string),
            ..Default::default()
        })
    }
}

/// Classify a registry error message.
fn push_error(message: String) -> Error {
    let lower = message.to_lowercase();
    let auth = ["unauthorized", "authentication required", "denied", "forbidden"]
        .iter()
        .any(|needle| lower.contains(needle));
    if auth {
        Error::Unauthorized(message)
    } else {
        Error::StepFailed {
            step: Step::Publish,
            exit_code: None,
            output: message,
        }
    }
}

#[async_trait]
impl ImagePublisher for DockerImagePublisher {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage> {
        if !request.source.contains("Dockerfile") {
            return Err(Error::InvalidInput(format!(
                "no Dockerfile in {}",
                request.source.path().display()
            )));
        }

        let reference = self.reference(request);
        info!(image = %reference, environment = %request.opts.environment, "Building image");
        run_command(&self.build_command(request, &reference), Step::Build).await?;

        let image_id = match self.docker.inspect_image(&reference).await {
            Ok(inspect) => inspect.id,
            Err(e) => {
                warn!(image = %reference, error = %e, "Built image not found in daemon");
                None
            }
        };

        Ok(BuiltImage {
            request: request.clone(),
            reference,
            image_id,
        })
    }

    async fn publish(&self, image: &BuiltImage) -> Result<String> {
        let name = self.image_name(&image.request.repository_name);
        let options = PushImageOptions {
            tag: image.request.opts.environment.clone(),
        };

        info!(image = %image.reference, authenticated = self.username.is_some(), "Pushing image");
        let mut stream = self
            .docker
            .push_image(&name, Some(options), self.credentials(image));
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(push_error(error));
                    }
                    if let Some(status) = info.status {
                        debug!(status = %status, "Push progress");
                    }
                }
                Err(e) => return Err(push_error(e.to_string())),
            }
        }

        let digest_prefix = format!("{}@", name);
        let published = match self.docker.inspect_image(&image.reference).await {
            Ok(inspect) => inspect
                .repo_digests
                .unwrap_or_default()
                .into_iter()
                .find(|digest| digest.starts_with(&digest_prefix)),
            Err(e) => {
                warn!(image = %image.reference, error = %e, "Could not read pushed digest");
                None
            }
        };

        Ok(published.unwrap_or_else(|| image.reference.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocbot_ci_core::delegate::DockerOpts;
    use mocbot_ci_core::{RunId, Secret, SourceDir};

    fn publisher(registry: &str) -> DockerImagePublisher {
        // Connecting is lazy; no daemon is contacted until a request is made.
        let docker = Docker::connect_with_local_defaults().unwrap();
        DockerImagePublisher::with_client(docker, registry)
    }

    fn request(dir: &tempfile::TempDir) -> BuildRequest {
        BuildRequest {
            run_id: RunId::new(),
            source: SourceDir::open(dir.path()).unwrap(),
            secret: Secret::new("infisical_client_secret", "s3cret"),
            repository_name: "mocbot-join-sound-uploader".to_string(),
            opts: DockerOpts {
                environment: "prod".to_string(),
            },
        }
    }

    #[test]
    fn test_reference_contains_repository_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let p = publisher("ghcr.io/mocbot/");
        assert_eq!(
            p.reference(&request(&dir)),
            "ghcr.io/mocbot/mocbot-join-sound-uploader:prod"
        );
    }

    #[test]
    fn test_reference_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        let p = publisher("");
        assert_eq!(p.reference(&request(&dir)), "mocbot-join-sound-uploader:prod");
    }

    #[test]
    fn test_build_command_keeps_secret_out_of_args() {
        let dir = tempfile::tempdir().unwrap();
        let p = publisher(DEFAULT_REGISTRY);
        let req = request(&dir);
        let cmd = p.build_command(&req, "ghcr.io/mocbot/mocbot-join-sound-uploader:prod");

        assert_eq!(cmd.program, "docker");
        assert_eq!(cmd.args[0], "build");
        assert!(cmd.args.contains(&"ENVIRONMENT=prod".to_string()));
        assert!(
            cmd.args
                .contains(&format!("id=infisical_client_secret,env={}", SECRET_ENV))
        );
        assert_eq!(cmd.args.last().unwrap(), ".");
        assert_eq!(cmd.current_dir.as_deref(), Some(req.source.path()));
        assert!(cmd.args.iter().all(|a| !a.contains("s3cret")));
        assert!(cmd.env.contains(&(SECRET_ENV.to_string(), "s3cret".to_string())));
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(publisher("ghcr.io/mocbot").registry_host(), Some("ghcr.io"));
        assert_eq!(
            publisher("localhost:5000").registry_host(),
            Some("localhost:5000")
        );
        assert_eq!(publisher("mocbot").registry_host(), None);
    }

    #[test]
    fn test_credentials_only_with_username() {
        let dir = tempfile::tempdir().unwrap();
        let image = BuiltImage {
            request: request(&dir),
            reference: "ghcr.io/mocbot/mocbot-join-sound-uploader:prod".to_string(),
            image_id: None,
        };

        assert!(publisher(DEFAULT_REGISTRY).credentials(&image).is_none());

        let creds = publisher(DEFAULT_REGISTRY)
            .with_username(Some("mocbot".to_string()))
            .credentials(&image)
            .unwrap();
        assert_eq!(creds.username.as_deref(), Some("mocbot"));
        assert_eq!(creds.password.as_deref(), Some("s3cret"));
        assert_eq!(creds.serveraddress.as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn test_push_error_classification() {
        assert!(matches!(
            push_error("unauthorized: authentication required".to_string()),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            push_error("denied: requested access to the resource is denied".to_string()),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            push_error("connection reset by peer".to_string()),
            Error::StepFailed {
                step: Step::Publish,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_build_requires_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let err = publisher(DEFAULT_REGISTRY)
            .build(&request(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let p = publisher(DEFAULT_REGISTRY).with_docker_bin("false");

        let err = p.build(&request(&dir)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::StepFailed {
                step: Step::Build,
                ..
            }
        ));
    }
}
