//! Error types for the orchestration engine
//!
//! Internal plumbing (configuration loading, environment commands, workspace
//! preparation) reports failures through [`RouterError`]. The router itself
//! never hands these to its callers: every execution attempt ends in a
//! [`crate::types::ModelResult`] instead.

use thiserror::Error;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum RouterError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Named environment is not known to the environment manager
    #[error("Environment '{0}' does not exist")]
    EnvironmentNotFound(String),

    /// Environment mutation (create/install) failed
    #[error("Environment '{name}' operation failed: {reason}")]
    EnvironmentOperation { name: String, reason: String },

    /// External command could not be started
    #[error("Failed to spawn '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// External command exceeded its time limit and was killed
    #[error("Command '{command}' timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    CommandTimeout {
        command: String,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    /// Logging subsystem errors
    #[error("Logging error: {0}")]
    LoggingError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Router error: {0}")]
    Generic(String),
}

impl RouterError {
    /// Whether this error is the distinguished command timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, RouterError::CommandTimeout { .. })
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, RouterError>;

/// Convert anyhow errors to RouterError, keeping the context chain
impl From<anyhow::Error> for RouterError {
    fn from(err: anyhow::Error) -> Self {
        RouterError::Generic(format!("{:#}", err))
    }
}
