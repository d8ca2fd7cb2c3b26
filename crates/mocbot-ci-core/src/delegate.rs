//! Delegate traits.
//!
//! Delegates do the actual work of the pipeline (installing dependencies,
//! linting, building and publishing images). The pipeline only parameterizes
//! them and calls their steps in order.

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::secret::Secret;
use crate::source::SourceDir;
use crate::{Result, RunId};

/// A single step of a pipeline operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[display("install")]
    Install,
    #[display("lint")]
    Lint,
    #[display("build")]
    Build,
    #[display("publish")]
    Publish,
}

/// Node.js package manager used by the Node CI delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[display("npm")]
    Npm,
    #[display("yarn")]
    Yarn,
    #[default]
    #[display("pnpm")]
    Pnpm,
}

impl PackageManager {
    /// Install command honoring the lockfile.
    pub fn install_command(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm ci",
            PackageManager::Yarn => "yarn install --frozen-lockfile",
            PackageManager::Pnpm => "pnpm install --frozen-lockfile",
        }
    }

    /// Command running the project's `lint` script.
    pub fn lint_command(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm run lint",
            PackageManager::Yarn => "yarn run lint",
            PackageManager::Pnpm => "pnpm run lint",
        }
    }

    /// Whether the package manager ships through corepack rather than with node.
    pub fn needs_corepack(&self) -> bool {
        !matches!(self, PackageManager::Npm)
    }
}

/// Options for the Node CI delegate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCiOpts {
    /// Node.js version, used as the `node` image tag.
    pub node_version: String,
    pub package_manager: PackageManager,
}

/// What the Node CI delegate operates on.
#[derive(Debug, Clone)]
pub struct NodeCiSpec {
    /// Run this work belongs to.
    pub run_id: RunId,
    /// Project directory containing `package.json`.
    pub source: SourceDir,
    pub opts: NodeCiOpts,
}

/// Dependencies installed by [`NodeCi::install`], consumed by [`NodeCi::lint`].
#[derive(Debug, Clone)]
pub struct NodeWorkspace {
    pub spec: NodeCiSpec,
    /// Delegate-specific handle to the installed state (e.g. a volume name).
    pub handle: String,
}

/// Installs and lints a Node.js project.
#[async_trait]
pub trait NodeCi: Send + Sync {
    /// Name of this delegate.
    fn name(&self) -> &'static str;

    /// Install dependencies.
    async fn install(&self, spec: &NodeCiSpec) -> Result<NodeWorkspace>;

    /// Run the lint script over an installed workspace, returning its stdout.
    async fn lint(&self, workspace: &NodeWorkspace) -> Result<String>;
}

/// Options for the image build/publish delegate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerOpts {
    /// Deployment target label forwarded to the build.
    pub environment: String,
}

/// Everything needed to build an image.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub run_id: RunId,
    /// Build context (the whole source tree).
    pub source: SourceDir,
    pub secret: Secret,
    pub repository_name: String,
    pub opts: DockerOpts,
}

/// An image built by [`ImagePublisher::build`].
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub request: BuildRequest,
    /// Tag reference, e.g. `ghcr.io/org/repo:prod`.
    pub reference: String,
    /// Image id reported by the builder, if known.
    pub image_id: Option<String>,
}

/// Builds a container image and publishes it to a registry.
#[async_trait]
pub trait ImagePublisher: Send + Sync {
    /// Name of this delegate.
    fn name(&self) -> &'static str;

    /// Build the image.
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage>;

    /// Push a built image, returning the published identifier.
    async fn publish(&self, image: &BuiltImage) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_manager_commands() {
        assert_eq!(
            PackageManager::Pnpm.install_command(),
            "pnpm install --frozen-lockfile"
        );
        assert_eq!(PackageManager::Pnpm.lint_command(), "pnpm run lint");
        assert_eq!(PackageManager::Npm.install_command(), "npm ci");
        assert!(PackageManager::Yarn.needs_corepack());
        assert!(!PackageManager::Npm.needs_corepack());
    }

    #[test]
    fn test_package_manager_default() {
        assert_eq!(PackageManager::default(), PackageManager::Pnpm);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::Install.to_string(), "install");
        assert_eq!(Step::Publish.to_string(), "publish");
    }
}
