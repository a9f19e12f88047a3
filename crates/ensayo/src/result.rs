//! Result and error types for Ensayo.
//!
//! The taxonomy mirrors the stages of a scenario run: element resolution,
//! action execution, HTTP transport, HTTP status, payload decoding and
//! assertion evaluation. Ambient variants cover configuration, definitions
//! and the automation protocol itself.

use thiserror::Error;

/// Result type for Ensayo operations
pub type EnsayoResult<T> = Result<T, EnsayoError>;

/// Errors raised while resolving a target descriptor to a live element
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No strategy produced a visible match before the window closed
    #[error("no element matched {descriptor} within {timeout_ms}ms")]
    NotFound {
        /// Descriptor that was attempted
        descriptor: String,
        /// Resolution window in milliseconds
        timeout_ms: u64,
    },

    /// Every matching strategy produced more than one visible candidate
    #[error("{descriptor} is ambiguous: strategy {strategy} matched {count} visible elements")]
    Ambiguous {
        /// Descriptor that was attempted
        descriptor: String,
        /// Last strategy that matched several elements
        strategy: String,
        /// Number of visible candidates
        count: usize,
    },

    /// The owning document went away while probing
    #[error("frame {frame} was detached during resolution")]
    FrameDetached {
        /// Frame path that was torn down
        frame: String,
    },
}

/// Errors raised while acting on a resolved element
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Element never became attached, visible, enabled and unobstructed
    #[error("element is not interactable: {reason}")]
    NotInteractable {
        /// Last observed blocking reason
        reason: String,
    },

    /// The action as a whole exceeded its budget
    #[error("{action} timed out after {timeout_ms}ms")]
    Timeout {
        /// Action name
        action: String,
        /// Budget in milliseconds
        timeout_ms: u64,
    },

    /// The action ran but its post-condition never held
    #[error("post-condition {condition} not met within {timeout_ms}ms")]
    PostConditionUnmet {
        /// Condition description
        condition: String,
        /// Budget in milliseconds
        timeout_ms: u64,
    },
}

/// Errors raised before an HTTP response was received
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// DNS failure, refused connection or broken stream
    #[error("connection failed: {message}")]
    ConnectionFailed {
        /// Error message
        message: String,
    },

    /// Request exceeded the fixed request timeout
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        timeout_ms: u64,
    },
}

/// Errors that can occur in Ensayo
#[derive(Debug, Error)]
pub enum EnsayoError {
    /// Locator resolution failed
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// Action execution failed
    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    /// HTTP transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Response carried an unexpected status code
    #[error("Unexpected HTTP status {code}: {body}")]
    HttpStatus {
        /// Status code
        code: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Response body could not be decoded
    #[error("Decode error: {message}")]
    Decode {
        /// Error message
        message: String,
    },

    /// An assertion did not hold
    #[error("Assertion failed: expected {expected}, got {actual}")]
    AssertionFailure {
        /// Expected value or state
        expected: String,
        /// Observed value or state
        actual: String,
    },

    /// Automation protocol error
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// Browser requested but not compiled in
    #[error("Browser support not available. Rebuild with --features browser")]
    BrowserUnavailable,

    /// Invalid scenario definition
    #[error("Invalid scenario: {message}")]
    Scenario {
        /// Error message
        message: String,
    },

    /// Invalid runner configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Run cancelled between steps
    #[error("Run cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl EnsayoError {
    /// Create a driver error
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Create a scenario definition error
    #[must_use]
    pub fn scenario(message: impl Into<String>) -> Self {
        Self::Scenario {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a decode error
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Stable label used in reports
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::Action(_) => "action",
            Self::Transport(_) => "transport",
            Self::HttpStatus { .. } => "http_status",
            Self::Decode { .. } => "decode",
            Self::AssertionFailure { .. } => "assertion",
            Self::Driver { .. } | Self::BrowserUnavailable => "driver",
            Self::Scenario { .. } | Self::Yaml(_) => "scenario",
            Self::Config { .. } => "config",
            Self::Cancelled => "cancelled",
            Self::Io(_) | Self::Json(_) => "io",
        }
    }

    /// Whether the owning frame must be re-resolved before retrying
    #[must_use]
    pub const fn is_frame_detached(&self) -> bool {
        matches!(
            self,
            Self::Resolution(ResolutionError::FrameDetached { .. })
        )
    }
}
