//! Health and statistics reports

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-backend health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Environment validation passed
    Healthy,
    /// Environment validation returned false
    Unhealthy,
    /// Environment validation panicked
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub environment: String,
    /// Number of tools the backend provides
    pub available_tools: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub registered_models: usize,
    pub active_executions: usize,
    pub queued_executions: usize,
    pub max_concurrent_executions: usize,
    pub model_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub router_status: String,
    pub models: BTreeMap<String, BackendHealth>,
    pub stats: RouterStats,
}

impl HealthReport {
    /// Every backend reported healthy
    pub fn all_healthy(&self) -> bool {
        self.models
            .values()
            .all(|backend| backend.status == HealthStatus::Healthy)
    }
}

/// Where a tracked execution currently is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionState {
    Running {
        model_name: String,
    },
    Queued {
        /// Zero-based position in the pending queue
        position: usize,
        model_name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_health_wire_shape() {
        let mut models = BTreeMap::new();
        models.insert(
            "lisflood".to_string(),
            BackendHealth {
                status: HealthStatus::Unhealthy,
                environment: "lisflood_env".to_string(),
                available_tools: 6,
                error: None,
            },
        );
        let report = HealthReport {
            router_status: "healthy".to_string(),
            models,
            stats: RouterStats {
                registered_models: 1,
                max_concurrent_executions: 3,
                model_names: vec!["lisflood".to_string()],
                ..Default::default()
            },
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["models"]["lisflood"]["status"], "unhealthy");
        assert!(value["models"]["lisflood"].get("error").is_none());
        assert_eq!(value["stats"]["queued_executions"], 0);
        assert!(!report.all_healthy());
    }

    #[test]
    fn test_execution_state_wire_shape() {
        let queued = ExecutionState::Queued {
            position: 2,
            model_name: "climada".to_string(),
        };
        assert_eq!(
            serde_json::to_value(queued).unwrap(),
            json!({"status": "queued", "position": 2, "model_name": "climada"})
        );
    }
}
