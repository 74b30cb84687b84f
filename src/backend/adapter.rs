//! Backend capability contract
//!
//! One implementation per external model. The router only ever talks to a
//! backend through this trait; backends are registered once into a map keyed
//! by [`ModelBackend::name`] and never inspected beyond it.

use crate::tools::ToolMetadata;
use crate::types::{ExecutionStatus, ModelResult, Parameters};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How commands for a backend are run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDescriptor {
    /// Named execution environment the backend's commands run inside
    pub environment: String,

    /// Model installation directory, when the backend has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

impl RuntimeDescriptor {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            model_path: None,
        }
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }
}

/// Execution capability for one external model
///
/// `execute` never fails past its own boundary: every failure becomes a
/// Failed [`ModelResult`]. The router still isolates panics, but a
/// well-behaved backend never relies on that.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Stable registration key
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "latest"
    }

    fn runtime(&self) -> &RuntimeDescriptor;

    /// Names of the tools this backend executes
    fn available_tools(&self) -> Vec<String>;

    /// Self-description registered into the tool registry on registration
    fn tool_metadata(&self) -> Vec<ToolMetadata> {
        Vec::new()
    }

    /// Idle unless an execution is in progress
    fn status(&self) -> ExecutionStatus {
        ExecutionStatus::Idle
    }

    /// Check the backend's environment; may be slow
    async fn validate_environment(&self) -> bool;

    /// Run one tool invocation
    async fn execute(
        &self,
        tool_name: &str,
        parameters: &Parameters,
        execution_id: &str,
    ) -> ModelResult;
}
