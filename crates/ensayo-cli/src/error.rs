//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ensayo library error
    #[error("{0}")]
    Ensayo(#[from] ensayo::EnsayoError),

    /// Report generation error
    #[error("Report generation failed: {message}")]
    ReportGeneration {
        /// Error message
        message: String,
    },

    /// The suite ran but not every scenario passed
    #[error("{failed} of {total} scenario(s) did not pass")]
    ScenariosFailed {
        /// Scenarios that failed or errored
        failed: usize,
        /// Scenarios run
        total: usize,
    },
}

impl CliError {
    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a report generation error
    #[must_use]
    pub fn report_generation(message: impl Into<String>) -> Self {
        Self::ReportGeneration {
            message: message.into(),
        }
    }

    /// Process exit code: 1 for scenario failures, 2 for everything else
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ScenariosFailed { .. } => 1,
            _ => 2,
        }
    }
}
