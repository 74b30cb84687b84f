//! Disposable per-execution working directories
//!
//! The router never removes these; whoever prepares a workspace decides
//! whether to call [`ExecutionWorkspace::cleanup`].

use crate::errors::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Working directory owned by a single execution
#[derive(Debug, Clone)]
pub struct ExecutionWorkspace {
    path: PathBuf,
}

impl ExecutionWorkspace {
    /// Create `<root>/<backend>_<execution_id>_<suffix>`
    ///
    /// The random suffix keeps resubmissions with a reused execution id from
    /// colliding with a directory left behind by an earlier attempt.
    pub async fn prepare(root: &Path, backend: &str, execution_id: &str) -> Result<Self> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let dir_name = format!(
            "{}_{}_{}",
            sanitize(backend),
            sanitize(execution_id),
            &suffix[..8]
        );
        let path = root.join(dir_name);

        tokio::fs::create_dir_all(&path).await?;
        info!(path = %path.display(), "Created execution directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pretty-print `value` into `<workspace>/<file_name>`
    pub async fn write_json(&self, file_name: &str, value: &Value) -> Result<PathBuf> {
        let target = self.path.join(file_name);
        let contents = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&target, contents).await?;
        Ok(target)
    }

    /// Parse `<workspace>/<file_name>` if it exists
    pub async fn read_json(&self, file_name: &str) -> Option<Value> {
        let target = self.path.join(file_name);
        let contents = tokio::fs::read(&target).await.ok()?;
        match serde_json::from_slice(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %target.display(), error = %e, "Could not parse result file");
                None
            }
        }
    }

    /// Top-level files whose extension is in `extensions`, sorted by path
    pub async fn collect_artifacts(&self, extensions: &[String]) -> Vec<String> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not list execution directory");
                return files;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext));
            if matches {
                files.push(path.display().to_string());
            }
        }

        files.sort();
        files
    }

    /// Remove the directory; failures are logged only
    pub async fn cleanup(self) {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Cleaned up execution directory"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to clean up execution directory"),
        }
    }
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
