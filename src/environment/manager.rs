//! Named execution environments backed by conda
//!
//! The manager resolves a conda installation once, caches a descriptor per
//! environment, and runs commands inside an environment with a hard
//! per-command timeout. Awaiting a command suspends only the calling task.
//!
//! # Discovery
//!
//! 1. Resolve the conda executable: explicit config, then well-known
//!    installation roots, then `conda` on `PATH`.
//! 2. Scan `<base>/envs/*` (plus `base` itself).
//! 3. If the scan finds nothing, fall back to `conda env list --json`.
//!
//! Failures along the way are logged; an empty environment set is valid.
//! The cache is not invalidated automatically: call [`EnvironmentManager::refresh`]
//! after mutating environments outside this manager.

use crate::config::EnvironmentsConfig;
use crate::environment::types::{
    CommandOutput, EnvironmentDescriptor, EnvironmentInfo, ValidationReport,
};
use crate::environment::process::{isolate_process_group, kill_process_group};
use crate::errors::{Result, RouterError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Name given to the conda base installation
pub const BASE_ENVIRONMENT: &str = "base";

const UNKNOWN_VERSION: &str = "unknown";

/// Resolved conda installation
#[derive(Debug, Clone, PartialEq, Eq)]
struct CondaInstall {
    executable: PathBuf,
    base: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct EnvList {
    envs: Vec<PathBuf>,
}

/// Manages named conda environments
#[derive(Debug)]
pub struct EnvironmentManager {
    settings: EnvironmentsConfig,
    conda: RwLock<Option<CondaInstall>>,
    environments: RwLock<HashMap<String, EnvironmentDescriptor>>,
}

impl EnvironmentManager {
    /// Create a manager with an empty cache; call [`Self::discover`] next
    pub fn new(settings: EnvironmentsConfig) -> Self {
        Self {
            settings,
            conda: RwLock::new(None),
            environments: RwLock::new(HashMap::new()),
        }
    }

    /// Create a manager and run discovery
    pub async fn discovered(settings: EnvironmentsConfig) -> Self {
        let manager = Self::new(settings);
        manager.discover().await;
        manager
    }

    pub fn settings(&self) -> &EnvironmentsConfig {
        &self.settings
    }

    /// Resolved conda executable, if any
    pub async fn conda_executable(&self) -> Option<PathBuf> {
        self.conda.read().await.as_ref().map(|c| c.executable.clone())
    }

    /// Populate the descriptor cache; returns the number of environments found
    pub async fn discover(&self) -> usize {
        let install = self.locate_conda().await;
        *self.conda.write().await = install.clone();

        let Some(install) = install else {
            warn!("Could not find a conda installation");
            self.environments.write().await.clear();
            return 0;
        };

        let mut paths = match &install.base {
            Some(base) => scan_installation(base).await,
            None => Vec::new(),
        };
        if paths.is_empty() {
            paths = self.list_via_conda(&install).await;
        }

        let mut found = HashMap::new();
        for path in paths {
            let name = environment_name(&path, install.base.as_deref());
            let python_version = self.probe_python_version(&path).await;
            found.insert(
                name.clone(),
                EnvironmentDescriptor {
                    name,
                    path,
                    python_version,
                },
            );
        }

        let count = found.len();
        *self.environments.write().await = found;
        info!(count, "Discovered conda environments");
        count
    }

    /// Re-run discovery, replacing the cache
    pub async fn refresh(&self) -> usize {
        self.discover().await
    }

    /// All cached descriptors, sorted by name
    pub async fn list(&self) -> Vec<EnvironmentDescriptor> {
        let mut list: Vec<_> = self.environments.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.environments.read().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<EnvironmentDescriptor> {
        self.environments.read().await.get(name).cloned()
    }

    /// Three-stage check: existence → accessibility → required packages.
    ///
    /// Never errors; each stage short-circuits the rest on failure.
    pub async fn validate(&self, name: &str, required_packages: &[String]) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !self.exists(name).await {
            warn!(environment = %name, "Environment does not exist");
            return report;
        }
        report.environment_exists = true;

        match self
            .run(
                name,
                &self.settings.probe_command,
                self.settings.accessibility_timeout(),
                None,
            )
            .await
        {
            Ok(output) if output.success() => report.environment_accessible = true,
            Ok(output) => {
                error!(
                    environment = %name,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "Environment is not accessible"
                );
                return report;
            }
            Err(e) => {
                error!(environment = %name, error = %e, "Environment is not accessible");
                return report;
            }
        }

        if required_packages.is_empty() {
            report.packages_installed = true;
            return report;
        }

        let missing = self.missing_packages(name, required_packages).await;
        report.packages_installed = missing.is_empty();
        report.missing_packages = Some(missing);
        report
    }

    /// Run `command` inside environment `name`.
    ///
    /// The process is killed when `timeout` expires and
    /// [`RouterError::CommandTimeout`] is returned. A non-zero exit is not an
    /// error here; callers inspect [`CommandOutput::exit_code`].
    pub async fn run(
        &self,
        name: &str,
        command: &[String],
        timeout: Duration,
        cwd: Option<&Path>,
    ) -> Result<CommandOutput> {
        let conda = self.require_conda().await?;

        let mut args = vec![
            "run".to_string(),
            "-n".to_string(),
            name.to_string(),
            "--no-capture-output".to_string(),
        ];
        args.extend(command.iter().cloned());

        debug!(environment = %name, command = %command.join(" "), "Running in environment");
        run_process(&conda, &args, timeout, cwd).await
    }

    /// Create a new environment and refresh the cache on success
    pub async fn create(
        &self,
        name: &str,
        python_version: &str,
        packages: &[String],
    ) -> Result<()> {
        let conda = self.require_conda().await?;

        let mut args = vec![
            "create".to_string(),
            "-n".to_string(),
            name.to_string(),
            format!("python={}", python_version),
            "-y".to_string(),
        ];
        args.extend(packages.iter().cloned());

        info!(environment = %name, python = %python_version, "Creating conda environment");
        let output = run_process(&conda, &args, self.settings.install_timeout(), None).await?;
        if !output.success() {
            error!(environment = %name, stderr = %output.stderr.trim(), "Failed to create environment");
            return Err(RouterError::EnvironmentOperation {
                name: name.to_string(),
                reason: failure_reason(&output),
            });
        }

        info!(environment = %name, "Created environment");
        self.refresh().await;
        Ok(())
    }

    /// Install packages into an existing environment, via conda or pip
    pub async fn install(&self, name: &str, packages: &[String], use_pip: bool) -> Result<()> {
        if !self.exists(name).await {
            error!(environment = %name, "Environment does not exist");
            return Err(RouterError::EnvironmentNotFound(name.to_string()));
        }

        let output = if use_pip {
            let mut command = vec!["pip".to_string(), "install".to_string()];
            command.extend(packages.iter().cloned());
            self.run(name, &command, self.settings.install_timeout(), None)
                .await?
        } else {
            let conda = self.require_conda().await?;
            let mut args = vec![
                "install".to_string(),
                "-n".to_string(),
                name.to_string(),
                "-y".to_string(),
            ];
            args.extend(packages.iter().cloned());
            run_process(&conda, &args, self.settings.install_timeout(), None).await?
        };

        if !output.success() {
            error!(environment = %name, stderr = %output.stderr.trim(), "Failed to install packages");
            return Err(RouterError::EnvironmentOperation {
                name: name.to_string(),
                reason: failure_reason(&output),
            });
        }

        info!(environment = %name, packages = ?packages, "Installed packages");
        self.refresh_descriptor(name).await;
        Ok(())
    }

    /// Cached descriptor merged with a fresh validation report
    pub async fn environment_info(&self, name: &str) -> Option<EnvironmentInfo> {
        let descriptor = self.get(name).await?;
        let validation = self.validate(name, &[]).await;
        Some(EnvironmentInfo {
            descriptor,
            validation,
        })
    }

    /// Clear conda package caches; failures are logged only
    pub async fn cleanup_caches(&self) {
        let Some(conda) = self.conda_executable().await else {
            return;
        };
        let args = ["clean", "--all", "-y"].map(String::from);
        match run_process(&conda, &args, self.settings.install_timeout(), None).await {
            Ok(output) if output.success() => debug!("Cleaned conda caches"),
            Ok(output) => warn!(stderr = %output.stderr.trim(), "Could not clean conda caches"),
            Err(e) => warn!(error = %e, "Could not clean conda caches"),
        }
    }

    async fn require_conda(&self) -> Result<PathBuf> {
        self.conda_executable().await.ok_or_else(|| {
            RouterError::ConfigError("no conda installation available".to_string())
        })
    }

    /// Re-probe one descriptor after the environment changed
    async fn refresh_descriptor(&self, name: &str) {
        let Some(path) = self.get(name).await.map(|d| d.path) else {
            return;
        };
        let python_version = self.probe_python_version(&path).await;
        if let Some(descriptor) = self.environments.write().await.get_mut(name) {
            descriptor.python_version = python_version;
        }
    }

    async fn missing_packages(&self, name: &str, packages: &[String]) -> Vec<String> {
        let conda = match self.require_conda().await {
            Ok(conda) => conda,
            Err(_) => return packages.to_vec(),
        };

        let mut missing = Vec::new();
        for package in packages {
            let args = vec![
                "list".to_string(),
                "-n".to_string(),
                name.to_string(),
                package.clone(),
            ];
            match run_process(&conda, &args, self.settings.package_check_timeout(), None).await {
                Ok(output) if output.success() && lists_package(&output.stdout, package) => {}
                Ok(_) => missing.push(package.clone()),
                Err(e) => {
                    warn!(environment = %name, package = %package, error = %e, "Could not check package");
                    missing.push(package.clone());
                }
            }
        }
        missing
    }

    async fn locate_conda(&self) -> Option<CondaInstall> {
        if let Some(executable) = &self.settings.conda_executable {
            let base = self.query_base(executable).await;
            return Some(CondaInstall {
                executable: executable.clone(),
                base,
            });
        }

        for root in candidate_roots(&self.settings.search_paths) {
            if let Some(executable) = conda_in(&root) {
                info!(path = %root.display(), "Found conda installation");
                return Some(CondaInstall {
                    executable,
                    base: Some(root),
                });
            }
        }

        let executable = PathBuf::from("conda");
        let base = self.query_base(&executable).await?;
        info!(path = %base.display(), "Found conda base via conda info");
        Some(CondaInstall { executable, base: Some(base) })
    }

    async fn query_base(&self, executable: &Path) -> Option<PathBuf> {
        let args = ["info", "--base"].map(String::from);
        match run_process(executable, &args, self.settings.version_probe_timeout(), None).await {
            Ok(output) if output.success() => {
                let base = PathBuf::from(output.stdout.trim());
                base.is_dir().then_some(base)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "conda info --base failed");
                None
            }
        }
    }

    async fn list_via_conda(&self, install: &CondaInstall) -> Vec<PathBuf> {
        let args = ["env", "list", "--json"].map(String::from);
        let output = match run_process(
            &install.executable,
            &args,
            self.settings.version_probe_timeout(),
            None,
        )
        .await
        {
            Ok(output) if output.success() => output,
            Ok(output) => {
                error!(stderr = %output.stderr.trim(), "Failed to list conda environments");
                return Vec::new();
            }
            Err(e) => {
                error!(error = %e, "Failed to list conda environments");
                return Vec::new();
            }
        };

        match serde_json::from_str::<EnvList>(&output.stdout) {
            Ok(list) => list.envs,
            Err(e) => {
                error!(error = %e, "Failed to parse conda environment list");
                Vec::new()
            }
        }
    }

    async fn probe_python_version(&self, env_path: &Path) -> String {
        let python = python_executable(env_path);
        if !python.exists() {
            return UNKNOWN_VERSION.to_string();
        }

        let args = ["--version".to_string()];
        match run_process(&python, &args, self.settings.version_probe_timeout(), None).await {
            Ok(output) if output.success() => parse_python_version(&output.stdout)
                .or_else(|| parse_python_version(&output.stderr))
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            _ => UNKNOWN_VERSION.to_string(),
        }
    }
}

/// Spawn `program`, capture its output, and kill its process group if
/// `timeout` expires
pub async fn run_process(
    program: &Path,
    args: &[String],
    timeout: Duration,
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    let rendered = render_command(program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate_process_group(&mut cmd);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let child = cmd.spawn().map_err(|source| RouterError::CommandSpawn {
        command: rendered.clone(),
        source,
    })?;
    let pid = child.id();

    // Dropping the future on timeout kills the direct child; the group kill
    // below reaches anything it started.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            command: rendered,
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        }),
        Ok(Err(e)) => Err(RouterError::IoError(e)),
        Err(_) => {
            let elapsed = start.elapsed();
            warn!(command = %rendered, limit_ms = timeout.as_millis() as u64, "Command timed out");
            if let Some(pid) = pid {
                if let Err(e) = kill_process_group(pid) {
                    error!(command = %rendered, error = %e, "Failed to kill process group");
                }
            }
            Err(RouterError::CommandTimeout {
                command: rendered,
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: timeout.as_millis() as u64,
            })
        }
    }
}

fn render_command(program: &Path, args: &[String]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

fn failure_reason(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("exit code {:?}", output.exit_code)
    } else {
        stderr.to_string()
    }
}

/// Installation roots probed when no executable is configured
fn candidate_roots(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = extra.to_vec();

    if let Some(prefix) = std::env::var_os("CONDA_PREFIX").filter(|p| !p.is_empty()) {
        roots.push(PathBuf::from(prefix));
    }
    if let Some(home) = dirs::home_dir() {
        for dir in ["anaconda3", "miniconda3", "miniforge3", "mambaforge"] {
            roots.push(home.join(dir));
        }
    }
    for dir in ["/opt/anaconda3", "/opt/miniconda3", "/opt/conda"] {
        roots.push(PathBuf::from(dir));
    }
    roots
}

fn conda_in(root: &Path) -> Option<PathBuf> {
    [root.join("bin").join("conda"), root.join("Scripts").join("conda.exe")]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

/// Base installation plus every directory under `<base>/envs`
async fn scan_installation(base: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let envs_dir = base.join("envs");

    match tokio::fs::read_dir(&envs_dir).await {
        Ok(mut entries) => loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.is_dir() {
                        paths.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %envs_dir.display(), error = %e, "Failed to scan environments");
                    break;
                }
            }
        },
        Err(e) => debug!(path = %envs_dir.display(), error = %e, "No envs directory"),
    }

    if !paths.is_empty() {
        paths.push(base.to_path_buf());
    }
    paths
}

fn environment_name(path: &Path, base: Option<&Path>) -> String {
    if base == Some(path) {
        return BASE_ENVIRONMENT.to_string();
    }
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn python_executable(env_path: &Path) -> PathBuf {
    if cfg!(windows) {
        env_path.join("python.exe")
    } else {
        env_path.join("bin").join("python")
    }
}

/// "Python 3.10.12" → "3.10.12"
fn parse_python_version(text: &str) -> Option<String> {
    text.split_whitespace()
        .last()
        .filter(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// `conda list` prints a header followed by one row per package
fn lists_package(stdout: &str, package: &str) -> bool {
    stdout
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == package)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_parse_python_version() {
        assert_eq!(parse_python_version("Python 3.10.12\n"), Some("3.10.12".to_string()));
        assert_eq!(parse_python_version(""), None);
        assert_eq!(parse_python_version("command not found"), None);
    }

    #[test]
    fn test_lists_package() {
        let stdout = "# packages in environment at /opt/conda/envs/climada_env:\n#\n# Name Version Build Channel\nclimada 4.1.0 pyhd8ed1ab_0 conda-forge\nclimada-petals 4.1.0 pyhd8ed1ab_0 conda-forge\n";
        assert!(lists_package(stdout, "climada"));
        assert!(lists_package(stdout, "climada-petals"));
        assert!(!lists_package(stdout, "climada-core"));
        assert!(!lists_package("# Name Version\n", "Name"));
    }

    #[test]
    fn test_environment_name() {
        let base = Path::new("/opt/conda");
        assert_eq!(environment_name(base, Some(base)), "base");
        assert_eq!(
            environment_name(Path::new("/opt/conda/envs/lisflood_env"), Some(base)),
            "lisflood_env"
        );
    }

    #[test]
    fn test_candidate_roots_prefers_configured() {
        let roots = candidate_roots(&[PathBuf::from("/srv/conda")]);
        assert_eq!(roots[0], PathBuf::from("/srv/conda"));
        assert!(roots.contains(&PathBuf::from("/opt/conda")));
    }

    #[tokio::test]
    async fn test_validate_unknown_environment_short_circuits() {
        let manager = EnvironmentManager::new(EnvironmentsConfig::default());
        let report = manager.validate("nope", &["numpy".to_string()]).await;
        assert_eq!(report, ValidationReport::default());
    }

    #[tokio::test]
    async fn test_run_without_conda_errors() {
        let manager = EnvironmentManager::new(EnvironmentsConfig::default());
        let err = assert_err!(
            manager
                .run("any", &["true".to_string()], Duration::from_secs(1), None)
                .await
        );
        assert!(matches!(err, RouterError::ConfigError(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_process_captures_output() {
        let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
        let output = assert_ok!(run_process(Path::new("sh"), &args, Duration::from_secs(5), None).await);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_process_timeout() {
        let args = vec!["5".to_string()];
        let err = run_process(Path::new("sleep"), &args, Duration::from_millis(100), None)
            .await
            .unwrap_err();
        match err {
            RouterError::CommandTimeout {
                elapsed_ms,
                limit_ms,
                ..
            } => {
                assert_eq!(limit_ms, 100);
                assert!(elapsed_ms >= 100);
                assert!(elapsed_ms < 5000);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_process_spawn_failure() {
        let err = run_process(
            Path::new("/nonexistent/definitely-not-a-binary"),
            &[],
            Duration::from_secs(1),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RouterError::CommandSpawn { .. }));
    }
}
