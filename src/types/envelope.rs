//! Result envelope returned for every execution attempt
//!
//! A [`ModelResult`] is built through a [`ResultBuilder`] and only becomes a
//! value once it reaches a terminal status, which is where `end_time` and
//! `duration` are stamped. Fields are read through accessors so the
//! terminal-transition invariants cannot be broken after construction:
//!
//! - `end_time` and `duration` are set exactly once, at the terminal transition
//! - `error` is present (and non-empty) iff the status is `Failed`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name stamped on envelopes produced by the router itself
pub const ROUTER_MODEL_NAME: &str = "router";

/// Metadata key carrying the reason of a cancellation
pub const CANCELLATION_REASON_KEY: &str = "cancellation_reason";

/// Execution status of a backend or a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Backend is not running anything
    #[default]
    Idle,

    /// Execution in progress
    Running,

    /// Execution finished successfully (terminal)
    Completed,

    /// Execution failed or was rejected (terminal)
    Failed,

    /// Execution was cancelled while queued (terminal)
    Cancelled,
}

impl ExecutionStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standardized outcome of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    model_name: String,
    tool_name: String,
    status: ExecutionStatus,
    execution_id: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end
    duration: Option<f64>,
    data: Option<Value>,
    files: Option<Vec<String>>,
    #[serde(default)]
    metadata: Map<String, Value>,
    error: Option<String>,
    environment: Option<String>,
    command: Option<String>,
    working_directory: Option<String>,
}

impl ModelResult {
    /// Start building a result; the clock starts now
    pub fn builder(
        model_name: impl Into<String>,
        tool_name: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> ResultBuilder {
        ResultBuilder {
            model_name: model_name.into(),
            tool_name: tool_name.into(),
            execution_id: execution_id.into(),
            start_time: Utc::now(),
            metadata: Map::new(),
            environment: None,
            command: None,
            working_directory: None,
        }
    }

    /// Failed envelope produced by the router (rejections, wrapped panics)
    pub fn router_failure(
        tool_name: impl Into<String>,
        execution_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::builder(ROUTER_MODEL_NAME, tool_name, execution_id).fail(error)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Duration in seconds
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn files(&self) -> Option<&[String]> {
        self.files.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }

    /// Serialize to the stable key/value shape
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// In-flight result; consumed by exactly one terminal transition
#[derive(Debug, Clone)]
pub struct ResultBuilder {
    model_name: String,
    tool_name: String,
    execution_id: String,
    start_time: DateTime<Utc>,
    metadata: Map<String, Value>,
    environment: Option<String>,
    command: Option<String>,
    working_directory: Option<String>,
}

impl ResultBuilder {
    /// Override the start timestamp
    pub fn started_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Terminal: completed with optional payload and artifacts
    pub fn complete(self, data: Option<Value>, files: Option<Vec<String>>) -> ModelResult {
        self.finish(ExecutionStatus::Completed, data, files, None)
    }

    /// Terminal: failed with an error message
    pub fn fail(self, error: impl Into<String>) -> ModelResult {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        self.finish(ExecutionStatus::Failed, None, None, Some(error))
    }

    /// Terminal: failed, keeping whatever payload and artifacts were produced
    pub fn fail_with_output(
        self,
        error: impl Into<String>,
        data: Option<Value>,
        files: Option<Vec<String>>,
    ) -> ModelResult {
        let mut result = self.fail(error);
        result.data = data;
        result.files = files;
        result
    }

    /// Terminal: cancelled before running; the reason goes to metadata
    pub fn cancel(self, reason: impl Into<String>) -> ModelResult {
        self.metadata(CANCELLATION_REASON_KEY, reason.into())
            .finish(ExecutionStatus::Cancelled, None, None, None)
    }

    fn finish(
        self,
        status: ExecutionStatus,
        data: Option<Value>,
        files: Option<Vec<String>>,
        error: Option<String>,
    ) -> ModelResult {
        let end_time = Utc::now().max(self.start_time);
        let duration = (end_time - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        ModelResult {
            model_name: self.model_name,
            tool_name: self.tool_name,
            status,
            execution_id: self.execution_id,
            start_time: self.start_time,
            end_time: Some(end_time),
            duration: Some(duration),
            data,
            files,
            metadata: self.metadata,
            error,
            environment: self.environment,
            command: self.command,
            working_directory: self.working_directory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completed_result_has_no_error() {
        let result = ModelResult::builder("lisflood", "flood_simulation", "exec-1")
            .environment("lisflood_env")
            .complete(Some(json!({"peak_discharge": 812.5})), Some(vec!["out.nc".into()]));

        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert!(result.is_success());
        assert!(result.error().is_none());
        assert!(result.end_time().is_some());
        assert!(result.duration().unwrap() >= 0.0);
        assert_eq!(result.files().unwrap(), ["out.nc".to_string()]);
        assert_eq!(result.environment(), Some("lisflood_env"));
    }

    #[test]
    fn test_failed_result_always_carries_error() {
        let result = ModelResult::builder("climada", "impact", "exec-2").fail("   ");
        assert!(result.is_failed());
        assert_eq!(result.error(), Some("unknown error"));
    }

    #[test]
    fn test_cancelled_result_reason_in_metadata() {
        let result = ModelResult::builder("router", "impact", "exec-3").cancel("cancelled by user");
        assert_eq!(result.status(), ExecutionStatus::Cancelled);
        assert!(result.error().is_none());
        assert_eq!(
            result.metadata().get(CANCELLATION_REASON_KEY),
            Some(&json!("cancelled by user"))
        );
    }

    #[test]
    fn test_router_failure_uses_router_name() {
        let result = ModelResult::router_failure("ghost_tool", "exec-4", "Tool 'ghost_tool' not found");
        assert_eq!(result.model_name(), ROUTER_MODEL_NAME);
        assert!(result.is_failed());
    }

    #[test]
    fn test_serialized_shape() {
        let result = ModelResult::builder("lisflood", "water_balance", "exec-5")
            .command("python run.py")
            .working_directory("/tmp/lisflood_exec-5")
            .metadata("attempt", 1)
            .complete(None, None);

        let value = result.to_value().unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "model_name",
            "tool_name",
            "status",
            "execution_id",
            "start_time",
            "end_time",
            "duration",
            "data",
            "files",
            "metadata",
            "error",
            "environment",
            "command",
            "working_directory",
        ] {
            assert!(obj.contains_key(key), "missing key {}", key);
        }
        assert_eq!(value["status"], "completed");
        assert_eq!(value["metadata"]["attempt"], 1);

        let back: ModelResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ExecutionStatus::Idle.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert_eq!(ExecutionStatus::Cancelled.to_string(), "cancelled");
    }
}
