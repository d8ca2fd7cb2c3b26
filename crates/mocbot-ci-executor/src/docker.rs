//! Node CI delegate running in local Docker containers.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use futures::StreamExt;
use mocbot_ci_core::delegate::{NodeCi, NodeCiOpts, NodeCiSpec, NodeWorkspace, Step};
use mocbot_ci_core::output::{CapturedOutput, LogLine, LogStream};
use mocbot_ci_core::{Error, Result, RunId};
use tracing::{debug, info, warn};

/// Mount point of the project inside CI containers.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Installs and lints Node.js projects in `node:<version>` containers.
///
/// The project directory is bind-mounted at [`WORKSPACE_DIR`]; installed
/// dependencies live in a per-run named volume mounted over `node_modules`,
/// so lint sees them without touching the host tree.
pub struct DockerNodeCi {
    docker: Docker,
}

impl DockerNodeCi {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(run_id: &RunId, step: Step) -> String {
        format!("mocbot-ci-{}-{}", run_id.simple(), step)
    }

    fn volume_name(run_id: &RunId) -> String {
        format!("mocbot-ci-{}-node-modules", run_id.simple())
    }

    fn image(opts: &NodeCiOpts) -> String {
        format!("node:{}", opts.node_version)
    }

    fn script(opts: &NodeCiOpts, step: Step) -> String {
        let command = match step {
            Step::Lint => opts.package_manager.lint_command(),
            _ => opts.package_manager.install_command(),
        };
        if opts.package_manager.needs_corepack() {
            format!("corepack enable && {}", command)
        } else {
            command.to_string()
        }
    }

    fn container_config(spec: &NodeCiSpec, volume: &str, step: Step) -> Config<String> {
        let binds = vec![
            format!("{}:{}:rw", spec.source.path().display(), WORKSPACE_DIR),
            format!("{}:{}/node_modules:rw", volume, WORKSPACE_DIR),
        ];

        Config {
            image: Some(Self::image(&spec.opts)),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                Self::script(&spec.opts, step),
            ]),
            env: Some(vec![
                "CI=true".to_string(),
                // corepack would otherwise prompt before downloading pnpm/yarn
                "COREPACK_ENABLE_DOWNLOAD_PROMPT=0".to_string(),
            ]),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut last_error = None;
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Pull warning");
                    last_error = Some(e);
                }
            }
        }

        // A failed pull is fine as long as the image is already local.
        if let Some(e) = last_error {
            self.docker.inspect_image(image).await.map_err(|_| {
                Error::ExecutionFailed(format!("Failed to pull image {}: {}", image, e))
            })?;
        }
        Ok(())
    }

    /// Run one step to completion in a fresh container, then remove it.
    async fn run_step(&self, spec: &NodeCiSpec, volume: &str, step: Step) -> Result<String> {
        let container_name = Self::container_name(&spec.run_id, step);
        let config = Self::container_config(spec, volume, step);
        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, "Creating container");
        self.docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;
        let resource = Resource::Container(container_name.clone());
        let mut guard = Cleanup::new(self.docker.clone(), resource.clone());

        let result = self.start_and_wait(&container_name, step).await;

        guard.disarm();
        cleanup(&self.docker, &resource).await;
        result
    }

    async fn start_and_wait(&self, container_name: &str, step: Step) -> Result<String> {
        info!(container = %container_name, "Starting container");
        self.docker
            .start_container(container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to start container: {}", e)))?;

        let output = self.collect_output(container_name).await?;
        if output.success() {
            Ok(output.stdout())
        } else {
            Err(Error::StepFailed {
                step,
                exit_code: output.exit_code,
                output: output.combined(),
            })
        }
    }

    /// Follow a container's logs until it exits, then read its exit code.
    async fn collect_output(&self, container_name: &str) -> Result<CapturedOutput> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut output = CapturedOutput::default();
        let mut stream = self.docker.logs(container_name, Some(options));
        while let Some(result) = stream.next().await {
            match result {
                Ok(chunk) => {
                    let (kind, message) = match chunk {
                        LogOutput::StdErr { message } => (LogStream::Stderr, message),
                        LogOutput::StdOut { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message } => (LogStream::Stdout, message),
                    };
                    for line in String::from_utf8_lossy(&message).lines() {
                        debug!(container = %container_name, "{}", line);
                        output.push(LogLine::new(kind, line));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Log stream error");
                }
            }
        }

        let inspect = self
            .docker
            .inspect_container(container_name, None)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Container not found: {}", e)))?;
        let state = inspect
            .state
            .ok_or_else(|| Error::Internal("No state".to_string()))?;
        if state.running.unwrap_or(false) {
            return Err(Error::Internal(format!(
                "log stream for {} ended while the container was still running",
                container_name
            )));
        }
        output.exit_code = state.exit_code;

        Ok(output)
    }
}

#[async_trait]
impl NodeCi for DockerNodeCi {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn install(&self, spec: &NodeCiSpec) -> Result<NodeWorkspace> {
        let image = Self::image(&spec.opts);
        self.pull_image(&image).await?;

        let volume = Self::volume_name(&spec.run_id);
        info!(volume = %volume, "Creating node_modules volume");
        self.docker
            .create_volume(CreateVolumeOptions {
                name: volume.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create volume: {}", e)))?;

        let resource = Resource::Volume(volume.clone());
        let mut guard = Cleanup::new(self.docker.clone(), resource.clone());
        let result = self.run_step(spec, &volume, Step::Install).await;
        guard.disarm();

        // Lint owns the volume from here on.
        if let Err(e) = result {
            cleanup(&self.docker, &resource).await;
            return Err(e);
        }

        Ok(NodeWorkspace {
            spec: spec.clone(),
            handle: volume,
        })
    }

    async fn lint(&self, workspace: &NodeWorkspace) -> Result<String> {
        let resource = Resource::Volume(workspace.handle.clone());
        let mut guard = Cleanup::new(self.docker.clone(), resource.clone());
        let result = self
            .run_step(&workspace.spec, &workspace.handle, Step::Lint)
            .await;

        // The lint container is gone by now, so the volume is detached.
        guard.disarm();
        cleanup(&self.docker, &resource).await;
        result
    }
}

#[derive(Debug, Clone)]
enum Resource {
    Container(String),
    Volume(String),
}

/// Force-remove a container or volume.
async fn remove(docker: &Docker, resource: &Resource) -> Result<()> {
    match resource {
        Resource::Container(name) => {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            docker
                .remove_container(name, Some(options))
                .await
                .map_err(|e| Error::ExecutionFailed(format!("Failed to remove container: {}", e)))
        }
        Resource::Volume(name) => docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to remove volume: {}", e))),
    }
}

async fn cleanup(docker: &Docker, resource: &Resource) {
    debug!(?resource, "Removing");
    if let Err(e) = remove(docker, resource).await {
        warn!(?resource, error = %e, "Cleanup failed");
    }
}

/// Removes a resource in the background if the step future is dropped
/// before it could clean up itself. Disarm it once removal is awaited.
struct Cleanup {
    docker: Docker,
    resource: Option<Resource>,
}

impl Cleanup {
    fn new(docker: Docker, resource: Resource) -> Self {
        Self {
            docker,
            resource: Some(resource),
        }
    }

    fn disarm(&mut self) {
        self.resource = None;
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(?resource, "No runtime to clean up on");
            return;
        };
        let docker = self.docker.clone();
        runtime.spawn(async move { cleanup(&docker, &resource).await });
    }
}
