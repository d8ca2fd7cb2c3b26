//! Error types for the CI pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::delegate::Step;

#[derive(Debug, Error)]
pub enum Error {
    #[error("source directory unavailable: {}: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{step} failed{}:\n{output}", .exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    StepFailed {
        step: Step,
        exit_code: Option<i64>,
        output: String,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_message_includes_output() {
        let err = Error::StepFailed {
            step: Step::Lint,
            exit_code: Some(1),
            output: "src/index.js: 'x' is defined but never used".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("lint failed with exit code 1"));
        assert!(msg.contains("'x' is defined but never used"));
    }

    #[test]
    fn test_step_failed_without_exit_code() {
        let err = Error::StepFailed {
            step: Step::Build,
            exit_code: None,
            output: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "build failed:\nboom");
    }
}
