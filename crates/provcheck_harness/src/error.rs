//! Error types for the harness.

use thiserror::Error;

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors raised while preparing or configuring a run.
///
/// Failures that happen *during* a run (apply, validation, destroy) are
/// recorded in the [`RunReport`](crate::report::RunReport) instead.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid suite configuration: {0}")]
    InvalidSuite(String),

    #[error("Unknown rule set: {0}")]
    UnknownRuleSet(String),

    #[error("Invalid rule {rule}: {message}")]
    InvalidRule { rule: String, message: String },

    #[error("Runner error: {0}")]
    Runner(#[from] provcheck_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A declared output could not be read in the shape a rule needs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("output '{0}' is missing")]
    Missing(String),

    #[error("output '{0}' is empty")]
    Empty(String),

    #[error("output '{0}' is structured, expected a string")]
    NotScalar(String),

    #[error("output '{0}' is a string, expected a map")]
    NotStructured(String),

    #[error("output '{output}' has no '{key}' entry")]
    MissingKey { output: String, key: String },

    #[error("output '{output}' has an empty '{key}' entry")]
    EmptyKey { output: String, key: String },
}

impl ExtractionError {
    /// True when the field is simply not there (absent or empty), as
    /// opposed to being present with the wrong shape.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            ExtractionError::Missing(_)
                | ExtractionError::Empty(_)
                | ExtractionError::MissingKey { .. }
                | ExtractionError::EmptyKey { .. }
        )
    }
}
