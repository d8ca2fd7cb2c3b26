//! The pipeline definition: `ci` and `build_and_push`.

use std::sync::Arc;
use tracing::info;

use crate::delegate::{
    BuildRequest, DockerOpts, ImagePublisher, NodeCi, NodeCiOpts, NodeCiSpec, PackageManager,
    Step,
};
use crate::{Error, Result, RunContext, Secret, SourceDir};

/// Node.js version used for CI.
pub const NODE_VERSION: &str = "23";

/// Package manager used for CI.
pub const PACKAGE_MANAGER: PackageManager = PackageManager::Pnpm;

/// Sub-directory of the source tree holding the frontend project.
pub const FRONTEND_DIR: &str = "frontend";

/// Environment used by `build_and_push` when none is given.
pub const DEFAULT_ENVIRONMENT: &str = "prod";

/// Options for [`PipelineDefinition::build_and_push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAndPushOpts {
    pub environment: String,
    /// Overrides the repository name given at construction.
    pub repository_name: Option<String>,
}

impl Default for BuildAndPushOpts {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            repository_name: None,
        }
    }
}

/// Run configuration plus the delegates that do the work.
///
/// Immutable once built; `ci` and `build_and_push` may run concurrently.
pub struct PipelineDefinition {
    repository_name: String,
    source: SourceDir,
    secret: Secret,
    node_ci: Arc<dyn NodeCi>,
    publisher: Arc<dyn ImagePublisher>,
}

impl PipelineDefinition {
    pub fn new(
        repository_name: impl Into<String>,
        source: SourceDir,
        secret: Secret,
        node_ci: Arc<dyn NodeCi>,
        publisher: Arc<dyn ImagePublisher>,
    ) -> Result<Self> {
        let repository_name = repository_name.into();
        require("repository name", &repository_name)?;

        Ok(Self {
            repository_name,
            source,
            secret,
            node_ci,
            publisher,
        })
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn source(&self) -> &SourceDir {
        &self.source
    }

    /// Install the frontend's dependencies, then lint it.
    ///
    /// Returns the lint step's stdout. Lint never runs if install fails.
    pub async fn ci(&self, ctx: &RunContext) -> Result<String> {
        let frontend = self.source.directory(FRONTEND_DIR)?;
        let spec = NodeCiSpec {
            run_id: ctx.run_id(),
            source: frontend,
            opts: NodeCiOpts {
                node_version: NODE_VERSION.to_string(),
                package_manager: PACKAGE_MANAGER,
            },
        };

        info!(
            run_id = %ctx.run_id(),
            delegate = self.node_ci.name(),
            source = %spec.source.path().display(),
            node_version = %spec.opts.node_version,
            package_manager = %spec.opts.package_manager,
            "Running CI"
        );

        let workspace = ctx.run(Step::Install, self.node_ci.install(&spec)).await?;
        let stdout = ctx.run(Step::Lint, self.node_ci.lint(&workspace)).await?;

        info!(run_id = %ctx.run_id(), "CI passed");
        Ok(stdout)
    }

    /// Build the container image from the whole source tree, then publish it.
    ///
    /// Returns the published identifier. Publish never runs if build fails.
    pub async fn build_and_push(&self, ctx: &RunContext, opts: BuildAndPushOpts) -> Result<String> {
        let repository_name = match opts.repository_name {
            Some(name) => {
                require("repository name", &name)?;
                name
            }
            None => self.repository_name.clone(),
        };
        require("environment", &opts.environment)?;

        let request = BuildRequest {
            run_id: ctx.run_id(),
            source: self.source.clone(),
            secret: self.secret.clone(),
            repository_name,
            opts: DockerOpts {
                environment: opts.environment,
            },
        };

        info!(
            run_id = %ctx.run_id(),
            delegate = self.publisher.name(),
            repository = %request.repository_name,
            environment = %request.opts.environment,
            "Building image"
        );

        let image = ctx.run(Step::Build, self.publisher.build(&request)).await?;
        let published = ctx.run(Step::Publish, self.publisher.publish(&image)).await?;

        info!(run_id = %ctx.run_id(), image = %published, "Image published");
        Ok(published)
    }
}

// Names are checked by the registry; only presence is enforced here.
fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}
