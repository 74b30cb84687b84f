//! Environment manager value types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cached description of a discovered environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    pub name: String,
    pub path: PathBuf,
    /// Interpreter version, or "unknown" when it could not be probed
    pub python_version: String,
}

/// Outcome of the three-stage environment check
///
/// Stages short-circuit: a report with `environment_exists == false` has
/// every other flag false as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub environment_exists: bool,
    pub environment_accessible: bool,
    pub packages_installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_packages: Option<Vec<String>>,
}

impl ValidationReport {
    /// All three stages passed
    pub fn is_valid(&self) -> bool {
        self.environment_exists && self.environment_accessible && self.packages_installed
    }
}

/// Descriptor merged with a fresh validation report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    #[serde(flatten)]
    pub descriptor: EnvironmentDescriptor,
    #[serde(flatten)]
    pub validation: ValidationReport,
}

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Rendered command line, for diagnostics
    pub command: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}
