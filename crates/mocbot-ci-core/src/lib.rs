//! Core types and traits for the mocbot CI pipeline.
//!
//! This crate contains:
//! - Run identifiers and the cancellable run context
//! - Source directory and secret handles
//! - Delegate traits for Node CI and image build/publish
//! - The pipeline definition exposing `ci` and `build_and_push`

pub mod context;
pub mod delegate;
pub mod error;
pub mod id;
pub mod output;
pub mod pipeline;
pub mod secret;
pub mod source;

pub use context::{CancelHandle, RunContext};
pub use error::{Error, Result};
pub use id::RunId;
pub use pipeline::{BuildAndPushOpts, PipelineDefinition};
pub use secret::{Secret, SecretRef, SecretStore};
pub use source::SourceDir;
