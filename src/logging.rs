//! Structured logging setup
//!
//! Components log through `tracing` macros with `tool`, `execution_id`,
//! `model` and `environment` fields. Embedders that already install a
//! subscriber can skip [`init`] entirely.

use crate::errors::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Logging configuration (`[logging]` section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.level).map_err(|_| {
            RouterError::ConfigError(format!(
                "logging.level '{}' is not a valid tracing directive",
                self.level
            ))
        })?;
        Ok(())
    }
}

/// Install a global stderr subscriber.
///
/// Errors when called more than once per process, or when another global
/// subscriber was installed first.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(RouterError::LoggingError(
            "logging already initialized".to_string(),
        ));
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| RouterError::LoggingError(format!("invalid filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| RouterError::LoggingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_is_valid() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_directive_validation() {
        let config = LoggingConfig {
            level: "mcp_router=debug,warn".to_string(),
            json: true,
        };
        assert!(config.validate().is_ok());

        let bad = LoggingConfig {
            level: "mcp_router=loud".to_string(),
            json: false,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init(&config);
        let err = init(&config).unwrap_err();
        assert!(err.to_string().contains("already initialized"));
    }
}
