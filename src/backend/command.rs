//! Configuration-driven backend
//!
//! Each tool maps to a command template run inside the backend's named
//! environment. Per execution the backend:
//!
//! 1. prepares a workspace and writes `parameters.json` into it
//! 2. renders the template (`{params_file}`, `{workdir}`, `{execution_id}`,
//!    `{tool}`, `{model_path}`)
//! 3. runs it through the [`EnvironmentManager`] with the tool's timeout
//! 4. reads the payload from `results.json`, else stdout JSON, else raw stdout
//! 5. collects artifacts by extension

use crate::backend::adapter::{ModelBackend, RuntimeDescriptor};
use crate::backend::workspace::ExecutionWorkspace;
use crate::config::WorkspaceConfig;
use crate::environment::{CommandOutput, EnvironmentManager};
use crate::errors::{Result, RouterError};
use crate::tools::{ParameterSpec, ToolMetadata};
use crate::types::{ExecutionStatus, ModelResult, Parameters, ResultBuilder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// File the backend writes tool parameters to
pub const PARAMETERS_FILE: &str = "parameters.json";

/// File a tool may write its structured payload to
pub const RESULTS_FILE: &str = "results.json";

fn default_version() -> String {
    "latest".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_artifact_extensions() -> Vec<String> {
    ["nc", "tss", "csv", "json", "xml"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

/// One `[[backends]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBackendConfig {
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Named environment every command runs inside
    pub environment: String,

    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Packages the environment check requires
    #[serde(default)]
    pub required_packages: Vec<String>,

    /// Extra check run inside the environment, e.g. an import smoke test
    #[serde(default)]
    pub validation_command: Vec<String>,

    /// Extensions (without the dot) collected as artifacts
    #[serde(default = "default_artifact_extensions")]
    pub artifact_extensions: Vec<String>,

    #[serde(default)]
    pub tools: Vec<CommandToolConfig>,
}

/// One `[[backends.tools]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandToolConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_category")]
    pub category: String,

    /// Program and arguments; placeholders are substituted per execution
    pub command: Vec<String>,

    /// Limit for the single command invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub estimated_runtime: Option<u64>,

    #[serde(default)]
    pub memory_requirements: Option<String>,
}

impl CommandBackendConfig {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            environment: environment.into(),
            model_path: None,
            required_packages: Vec::new(),
            validation_command: Vec::new(),
            artifact_extensions: default_artifact_extensions(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: CommandToolConfig) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RouterError::ConfigError(
                "backend name must not be empty".to_string(),
            ));
        }
        if self.environment.trim().is_empty() {
            return Err(RouterError::ConfigError(format!(
                "backend '{}' must name an environment",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(RouterError::ConfigError(format!(
                    "backend '{}' has a tool without a name",
                    self.name
                )));
            }
            if tool.command.is_empty() {
                return Err(RouterError::ConfigError(format!(
                    "tool '{}' of backend '{}' has an empty command",
                    tool.name, self.name
                )));
            }
            if tool.timeout_secs == 0 {
                return Err(RouterError::ConfigError(format!(
                    "tool '{}' of backend '{}' must have a timeout greater than 0",
                    tool.name, self.name
                )));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(RouterError::ConfigError(format!(
                    "backend '{}' declares tool '{}' twice",
                    self.name, tool.name
                )));
            }
        }
        Ok(())
    }
}

impl CommandToolConfig {
    pub fn new<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            category: default_category(),
            command: command.into_iter().map(Into::into).collect(),
            timeout_secs: default_timeout_secs(),
            parameters: BTreeMap::new(),
            tags: Vec::new(),
            estimated_runtime: None,
            memory_requirements: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn metadata(&self, backend: &str) -> ToolMetadata {
        let mut metadata =
            ToolMetadata::new(&self.name, &self.description, backend, &self.category)
                .with_tags(self.tags.iter().cloned());
        metadata.parameters = self.parameters.clone();
        metadata.estimated_runtime = self.estimated_runtime;
        metadata.memory_requirements = self.memory_requirements.clone();
        metadata
    }
}

#[derive(Debug, Default)]
struct RunState {
    /// In-flight execution ids, oldest first
    running: Vec<String>,
}

/// Generic backend driven by [`CommandBackendConfig`]
pub struct CommandBackend {
    config: CommandBackendConfig,
    runtime: RuntimeDescriptor,
    environments: Arc<EnvironmentManager>,
    workspace: WorkspaceConfig,
    state: Mutex<RunState>,
}

impl CommandBackend {
    pub fn new(
        config: CommandBackendConfig,
        environments: Arc<EnvironmentManager>,
        workspace: WorkspaceConfig,
    ) -> Self {
        let mut runtime = RuntimeDescriptor::new(&config.environment);
        runtime.model_path = config.model_path.clone();
        Self {
            config,
            runtime,
            environments,
            workspace,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn config(&self) -> &CommandBackendConfig {
        &self.config
    }

    /// Most recently started execution still in flight
    pub fn current_execution_id(&self) -> Option<String> {
        self.with_state(|state| state.running.last().cloned())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RunState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn tool(&self, name: &str) -> Option<&CommandToolConfig> {
        self.config.tools.iter().find(|tool| tool.name == name)
    }

    async fn run_tool(
        &self,
        tool: &CommandToolConfig,
        parameters: &Parameters,
        builder: ResultBuilder,
    ) -> ModelResult {
        let execution_id = builder.execution_id().to_string();

        let workspace =
            match ExecutionWorkspace::prepare(&self.workspace.root, &self.config.name, &execution_id)
                .await
            {
                Ok(workspace) => workspace,
                Err(e) => return builder.fail(format!("Failed to prepare workspace: {}", e)),
            };
        let builder = builder.working_directory(workspace.path().display().to_string());

        let params_file = match workspace
            .write_json(PARAMETERS_FILE, &Value::Object(parameters.clone()))
            .await
        {
            Ok(path) => path,
            Err(e) => return builder.fail(format!("Failed to write parameters: {}", e)),
        };

        let substitutions = [
            ("{params_file}", params_file.display().to_string()),
            ("{workdir}", workspace.path().display().to_string()),
            ("{execution_id}", execution_id.clone()),
            ("{tool}", tool.name.clone()),
            (
                "{model_path}",
                self.config
                    .model_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        ];
        let command = render_command(&tool.command, &substitutions);
        let builder = builder.command(command.join(" "));

        info!(
            model = %self.config.name,
            tool = %tool.name,
            execution_id = %execution_id,
            workdir = %workspace.path().display(),
            "Executing tool"
        );

        let output = match self
            .environments
            .run(
                &self.config.environment,
                &command,
                tool.timeout(),
                Some(workspace.path()),
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(tool = %tool.name, execution_id = %execution_id, error = %e, "Tool command failed");
                return builder
                    .metadata("timed_out", e.is_timeout())
                    .fail(e.to_string());
            }
        };

        let builder = builder.metadata("exit_code", json!(output.exit_code));
        let files = workspace.collect_artifacts(&self.config.artifact_extensions).await;

        if !output.success() {
            warn!(
                tool = %tool.name,
                execution_id = %execution_id,
                exit_code = ?output.exit_code,
                "Tool exited unsuccessfully"
            );
            return builder.fail_with_output(failure_message(&output), None, Some(files));
        }

        let payload = match workspace.read_json(RESULTS_FILE).await {
            Some(payload) => payload,
            None => parse_stdout(&output.stdout),
        };

        if self.workspace.cleanup_on_success {
            workspace.cleanup().await;
            return builder.complete(Some(payload), None);
        }
        builder.complete(Some(payload), Some(files))
    }
}

#[async_trait]
impl ModelBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn runtime(&self) -> &RuntimeDescriptor {
        &self.runtime
    }

    fn available_tools(&self) -> Vec<String> {
        self.config.tools.iter().map(|tool| tool.name.clone()).collect()
    }

    fn tool_metadata(&self) -> Vec<ToolMetadata> {
        self.config
            .tools
            .iter()
            .map(|tool| tool.metadata(&self.config.name))
            .collect()
    }

    fn status(&self) -> ExecutionStatus {
        self.with_state(|state| {
            if state.running.is_empty() {
                ExecutionStatus::Idle
            } else {
                ExecutionStatus::Running
            }
        })
    }

    async fn validate_environment(&self) -> bool {
        let report = self
            .environments
            .validate(&self.config.environment, &self.config.required_packages)
            .await;
        if !report.is_valid() {
            error!(
                model = %self.config.name,
                environment = %self.config.environment,
                missing = ?report.missing_packages,
                "Environment validation failed"
            );
            return false;
        }

        if self.config.validation_command.is_empty() {
            return true;
        }

        let timeout = self.environments.settings().accessibility_timeout();
        match self
            .environments
            .run(&self.config.environment, &self.config.validation_command, timeout, None)
            .await
        {
            Ok(output) if output.success() => true,
            Ok(output) => {
                error!(model = %self.config.name, stderr = %output.stderr.trim(), "Validation command failed");
                false
            }
            Err(e) => {
                error!(model = %self.config.name, error = %e, "Validation command failed");
                false
            }
        }
    }

    async fn execute(
        &self,
        tool_name: &str,
        parameters: &Parameters,
        execution_id: &str,
    ) -> ModelResult {
        let builder = ModelResult::builder(&self.config.name, tool_name, execution_id)
            .environment(&self.config.environment);

        let Some(tool) = self.tool(tool_name) else {
            return builder.fail(format!("Tool '{}' not available", tool_name));
        };

        self.with_state(|state| state.running.push(execution_id.to_string()));
        let result = self.run_tool(tool, parameters, builder).await;
        self.with_state(|state| state.running.retain(|id| id != execution_id));

        result
    }
}

fn render_command(template: &[String], substitutions: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            substitutions
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect()
}

/// Whole stdout as JSON when it parses, otherwise wrapped raw text
fn parse_stdout(stdout: &str) -> Value {
    match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(value) if !stdout.trim().is_empty() => value,
        _ => json!({ "stdout": stdout }),
    }
}

fn failure_message(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    match output.exit_code {
        Some(code) if stderr.is_empty() => format!("Command exited with code {}", code),
        Some(code) => format!("Command exited with code {}: {}", code, stderr),
        None if stderr.is_empty() => "Command terminated by signal".to_string(),
        None => format!("Command terminated by signal: {}", stderr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentsConfig;

    fn backend_config() -> CommandBackendConfig {
        CommandBackendConfig::new("lisflood", "lisflood_env").with_tool(
            CommandToolConfig::new(
                "flood_simulation",
                ["python", "run.py", "{params_file}", "--out={workdir}"],
            )
            .with_parameter("region", ParameterSpec::required("string")),
        )
    }

    #[test]
    fn test_render_command() {
        let template = vec!["run".to_string(), "--id={execution_id}".to_string(), "{tool}".to_string()];
        let rendered = render_command(
            &template,
            &[("{execution_id}", "abc".to_string()), ("{tool}", "flood".to_string())],
        );
        assert_eq!(rendered, vec!["run", "--id=abc", "flood"]);
    }

    #[test]
    fn test_parse_stdout() {
        assert_eq!(parse_stdout("{\"ok\": true}\n")["ok"], true);
        assert_eq!(parse_stdout("done\n")["stdout"], "done\n");
        assert_eq!(parse_stdout("")["stdout"], "");
    }

    #[test]
    fn test_failure_message() {
        let output = CommandOutput {
            command: "python run.py".to_string(),
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "ImportError: lisflood\n".to_string(),
            duration: Duration::from_millis(5),
        };
        assert_eq!(failure_message(&output), "Command exited with code 2: ImportError: lisflood");
    }

    #[test]
    fn test_config_validation() {
        assert!(backend_config().validate().is_ok());

        let empty_command = CommandBackendConfig::new("x", "env")
            .with_tool(CommandToolConfig::new("t", Vec::<String>::new()));
        assert!(empty_command.validate().is_err());

        let duplicate = backend_config().with_tool(CommandToolConfig::new("flood_simulation", ["true"]));
        assert!(duplicate.validate().unwrap_err().to_string().contains("twice"));

        assert!(CommandBackendConfig::new("x", " ").validate().is_err());
    }

    #[test]
    fn test_self_description() {
        let environments = Arc::new(EnvironmentManager::new(EnvironmentsConfig::default()));
        let backend = CommandBackend::new(backend_config(), environments, WorkspaceConfig::default());

        assert_eq!(backend.name(), "lisflood");
        assert_eq!(backend.version(), "latest");
        assert_eq!(backend.runtime().environment, "lisflood_env");
        assert_eq!(backend.available_tools(), vec!["flood_simulation"]);
        assert_eq!(backend.status(), ExecutionStatus::Idle);

        let metadata = backend.tool_metadata();
        assert_eq!(metadata[0].backend, "lisflood");
        assert_eq!(metadata[0].category, "general");
        assert_eq!(metadata[0].required_parameters(), vec!["region"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_running() {
        let environments = Arc::new(EnvironmentManager::new(EnvironmentsConfig::default()));
        let backend = CommandBackend::new(backend_config(), environments, WorkspaceConfig::default());

        let result = backend.execute("water_balance", &Parameters::new(), "e1").await;
        assert!(result.is_failed());
        assert!(result.error().unwrap().contains("water_balance"));
        assert_eq!(result.model_name(), "lisflood");
        assert!(backend.current_execution_id().is_none());
    }

    #[tokio::test]
    async fn test_missing_conda_fails_with_workspace_recorded() {
        let root = tempfile::tempdir().unwrap();
        let environments = Arc::new(EnvironmentManager::new(EnvironmentsConfig::default()));
        let workspace = WorkspaceConfig {
            root: root.path().to_path_buf(),
            cleanup_on_success: false,
        };
        let backend = CommandBackend::new(backend_config(), environments, workspace);

        let result = backend
            .execute("flood_simulation", &Parameters::new(), "e2")
            .await;
        assert!(result.is_failed());
        assert_eq!(result.environment(), Some("lisflood_env"));
        assert!(result.command().unwrap().contains("parameters.json"));
        let workdir = PathBuf::from(result.working_directory().unwrap());
        assert!(workdir.join(PARAMETERS_FILE).is_file());
        assert_eq!(backend.status(), ExecutionStatus::Idle);
    }
}
