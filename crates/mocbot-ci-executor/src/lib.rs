//! Docker-backed delegates for the mocbot CI pipeline.
//!
//! - [`DockerNodeCi`] installs and lints a Node.js project in `node` containers
//! - [`DockerImagePublisher`] builds an image with BuildKit and pushes it

pub mod docker;
pub mod process;
pub mod publish;

pub use docker::DockerNodeCi;
pub use publish::DockerImagePublisher;
