//! Configuration management for the router
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.mcp-router/config.toml

use crate::backend::command::CommandBackendConfig;
use crate::errors::{Result, RouterError};
use crate::logging::LoggingConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default ceiling on concurrently running executions
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 3;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub environments: EnvironmentsConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Declarative command backends
    #[serde(default)]
    pub backends: Vec<CommandBackendConfig>,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub max_concurrent_executions: usize,
}

/// Environment manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentsConfig {
    /// Explicit conda executable; probed from well-known locations when unset
    pub conda_executable: Option<PathBuf>,
    /// Extra installation roots checked before the built-in ones
    pub search_paths: Vec<PathBuf>,
    /// Trivial command used for the accessibility check
    pub probe_command: Vec<String>,
    pub accessibility_timeout_secs: u64,
    pub package_check_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub version_probe_timeout_secs: u64,
}

/// Per-execution working directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent of every per-execution directory
    pub root: PathBuf,
    /// Remove the directory after a successful run
    pub cleanup_on_success: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
        }
    }
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            conda_executable: None,
            search_paths: Vec::new(),
            probe_command: vec!["python".to_string(), "--version".to_string()],
            accessibility_timeout_secs: 30,
            package_check_timeout_secs: 30,
            install_timeout_secs: 1800,
            version_probe_timeout_secs: 10,
        }
    }
}

impl EnvironmentsConfig {
    pub fn accessibility_timeout(&self) -> Duration {
        Duration::from_secs(self.accessibility_timeout_secs)
    }

    pub fn package_check_timeout(&self) -> Duration {
        Duration::from_secs(self.package_check_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn version_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.version_probe_timeout_secs)
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("mcp-router"),
            cleanup_on_success: false,
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(&config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))
            .map_err(|e| RouterError::ConfigError(format!("{:#}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| RouterError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// Standard configuration location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".mcp-router").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.router.max_concurrent_executions == 0 {
            return Err(RouterError::ConfigError(
                "max_concurrent_executions must be greater than 0".to_string(),
            ));
        }

        let env = &self.environments;
        if env.probe_command.is_empty() {
            return Err(RouterError::ConfigError(
                "environments.probe_command must not be empty".to_string(),
            ));
        }
        for (key, value) in [
            ("accessibility_timeout_secs", env.accessibility_timeout_secs),
            ("package_check_timeout_secs", env.package_check_timeout_secs),
            ("install_timeout_secs", env.install_timeout_secs),
            ("version_probe_timeout_secs", env.version_probe_timeout_secs),
        ] {
            if value == 0 {
                return Err(RouterError::ConfigError(format!(
                    "environments.{} must be greater than 0",
                    key
                )));
            }
        }

        self.logging.validate()?;

        let mut names = HashSet::new();
        for backend in &self.backends {
            backend.validate()?;
            if !names.insert(backend.name.as_str()) {
                return Err(RouterError::ConfigError(format!(
                    "duplicate backend name '{}'",
                    backend.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.router.max_concurrent_executions, 3);
        assert_eq!(config.environments.accessibility_timeout(), Duration::from_secs(30));
        assert_eq!(config.environments.probe_command, vec!["python", "--version"]);
        assert!(config.backends.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [router]
            max_concurrent_executions = 5

            [environments]
            search_paths = ["/srv/conda"]
            "#,
        )
        .unwrap();

        assert_eq!(config.router.max_concurrent_executions, 5);
        assert_eq!(config.environments.search_paths, vec![PathBuf::from("/srv/conda")]);
        assert_eq!(config.environments.install_timeout_secs, 1800);
        assert!(!config.workspace.cleanup_on_success);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = Config::from_toml_str("[router]\nmax_concurrent_executions = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrent_executions"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err =
            Config::from_toml_str("[environments]\npackage_check_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("package_check_timeout_secs"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[router\n").unwrap_err();
        assert!(matches!(err, RouterError::ConfigError(_)));
    }

    #[test]
    fn test_backend_section() {
        let config = Config::from_toml_str(
            r#"
            [[backends]]
            name = "lisflood"
            environment = "lisflood_env"

            [[backends.tools]]
            name = "flood_simulation"
            category = "simulation"
            command = ["python", "run_lisflood.py", "{params_file}"]
            timeout_secs = 7200

            [backends.tools.parameters.region]
            type = "string"
            required = true
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.len(), 1);
        let backend = &config.backends[0];
        assert_eq!(backend.environment, "lisflood_env");
        assert_eq!(backend.tools[0].timeout_secs, 7200);
        assert!(backend.tools[0].parameters["region"].required);
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[backends]]
            name = "climada"
            environment = "climada_env"

            [[backends]]
            name = "climada"
            environment = "climada_env2"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate backend name"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[workspace]\ncleanup_on_success = true\n").unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert!(config.workspace.cleanup_on_success);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load_from_file(Path::new("/nonexistent/mcp-router.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
        assert!(err.to_string().contains("No such file"));
    }
}
