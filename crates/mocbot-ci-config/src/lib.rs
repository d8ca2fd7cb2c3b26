//! KDL configuration parsing for the mocbot CI pipeline.
//!
//! Parses the optional `mocbot.kdl` file holding the pipeline's
//! construction parameters.

pub mod error;
pub mod pipeline;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::{DEFAULT_CONFIG_FILE, PipelineConfig, RegistryConfig, load_pipeline, parse_pipeline};
