//! Submission shape accepted by the router

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool parameters keyed by name
pub type Parameters = Map<String, Value>;

/// A tool invocation as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Registered tool name
    pub tool_name: String,

    /// Tool parameters
    #[serde(default)]
    pub parameters: Parameters,

    /// Higher runs first when the router is saturated
    #[serde(default)]
    pub priority: i32,

    /// Caller-supplied id; generated when absent
    #[serde(default)]
    pub execution_id: Option<String>,
}

impl ExecutionRequest {
    /// Create a request with default priority and a generated id
    pub fn new(tool_name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            priority: 0,
            execution_id: None,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a caller-chosen execution id
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_minimal_submit() {
        let request: ExecutionRequest =
            serde_json::from_value(json!({"tool_name": "flood_simulation"})).unwrap();
        assert_eq!(request.tool_name, "flood_simulation");
        assert!(request.parameters.is_empty());
        assert_eq!(request.priority, 0);
        assert!(request.execution_id.is_none());
    }

    #[test]
    fn test_builder() {
        let mut params = Parameters::new();
        params.insert("region".into(), json!("danube"));
        let request = ExecutionRequest::new("flood_forecast", params)
            .with_priority(5)
            .with_execution_id("exec-42");

        assert_eq!(request.priority, 5);
        assert_eq!(request.execution_id.as_deref(), Some("exec-42"));
        assert_eq!(request.parameters["region"], "danube");
    }
}
