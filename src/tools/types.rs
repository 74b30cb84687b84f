//! Tool metadata types
//!
//! Describes what a backend offers: the tool name, the owning backend, a
//! category, and a parameter schema the router checks submissions against.

use crate::types::Parameters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Schema entry for a single tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Declared type name (informational)
    #[serde(rename = "type", default = "ParameterSpec::any_type")]
    pub kind: String,

    /// Whether callers must supply the parameter
    #[serde(default)]
    pub required: bool,

    /// Default used by the backend when absent
    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    fn any_type() -> String {
        "any".to_string()
    }

    /// Required parameter of the given type
    pub fn required(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            required: true,
            default: None,
            description: None,
        }
    }

    /// Optional parameter with a default value
    pub fn optional(kind: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            required: false,
            default: Some(default.into()),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Metadata for a registered tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique tool name (registry key)
    pub name: String,

    pub description: String,

    /// Owning backend
    #[serde(rename = "model_name")]
    pub backend: String,

    /// Category tag (e.g. "simulation", "analysis")
    pub category: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,

    #[serde(default)]
    pub return_type: Option<String>,

    #[serde(default = "default_true")]
    pub requires_environment: bool,

    /// Estimated runtime in seconds
    #[serde(default)]
    pub estimated_runtime: Option<u64>,

    /// Free-form memory hint, e.g. "8GB"
    #[serde(default)]
    pub memory_requirements: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub examples: Vec<Value>,

    #[serde(default = "default_version")]
    pub version: String,
}

impl ToolMetadata {
    /// Create metadata with an empty parameter schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        backend: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            backend: backend.into(),
            category: category.into(),
            parameters: BTreeMap::new(),
            return_type: None,
            requires_environment: true,
            estimated_runtime: None,
            memory_requirements: None,
            tags: Vec::new(),
            examples: Vec::new(),
            version: default_version(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_estimated_runtime(mut self, seconds: u64) -> Self {
        self.estimated_runtime = Some(seconds);
        self
    }

    pub fn with_memory_requirements(mut self, memory: impl Into<String>) -> Self {
        self.memory_requirements = Some(memory.into());
        self
    }

    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }

    pub fn with_example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_requires_environment(mut self, requires: bool) -> Self {
        self.requires_environment = requires;
        self
    }

    /// Names of parameters marked required, in schema order
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Required parameters absent from `parameters`
    pub fn missing_parameters(&self, parameters: &Parameters) -> Vec<String> {
        self.required_parameters()
            .into_iter()
            .filter(|name| !parameters.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    /// Tool carries every one of `tags`
    pub fn has_all_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }
}

/// AND-combined filter for [`crate::tools::ToolRegistry::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFilter {
    pub backend: Option<String>,
    pub category: Option<String>,
    /// Tool must carry all of these
    pub tags: Vec<String>,
}

impl ToolFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Check a single tool against every set criterion
    pub fn matches(&self, tool: &ToolMetadata) -> bool {
        if let Some(backend) = &self.backend {
            if &tool.backend != backend {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &tool.category != category {
                return false;
            }
        }
        tool.has_all_tags(&self.tags)
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub total_categories: usize,
    pub total_models: usize,
    pub tools_by_category: BTreeMap<String, usize>,
    pub tools_by_model: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flood_tool() -> ToolMetadata {
        ToolMetadata::new("flood_simulation", "Run a flood simulation", "lisflood", "simulation")
            .with_parameter("region", ParameterSpec::required("string"))
            .with_parameter("start_date", ParameterSpec::required("string"))
            .with_parameter("timestep", ParameterSpec::optional("integer", 86400))
            .with_tags(["flood", "hydrology"])
    }

    #[test]
    fn test_required_parameters() {
        let tool = flood_tool();
        assert_eq!(tool.required_parameters(), vec!["region", "start_date"]);
    }

    #[test]
    fn test_missing_parameters() {
        let tool = flood_tool();
        let mut params = Parameters::new();
        params.insert("start_date".into(), json!("2024-01-01"));
        assert_eq!(tool.missing_parameters(&params), vec!["region".to_string()]);

        params.insert("region".into(), json!("rhine"));
        assert!(tool.missing_parameters(&params).is_empty());
    }

    #[test]
    fn test_filter_requires_all_tags() {
        let tool = flood_tool();
        assert!(ToolFilter::new().tag("flood").matches(&tool));
        assert!(ToolFilter::new().tag("flood").tag("hydrology").matches(&tool));
        assert!(!ToolFilter::new().tag("flood").tag("wildfire").matches(&tool));
    }

    #[test]
    fn test_filter_and_combination() {
        let tool = flood_tool();
        assert!(ToolFilter::new().backend("lisflood").category("simulation").matches(&tool));
        assert!(!ToolFilter::new().backend("lisflood").category("analysis").matches(&tool));
        assert!(!ToolFilter::new().backend("climada").matches(&tool));
    }

    #[test]
    fn test_metadata_wire_names() {
        let value = serde_json::to_value(flood_tool()).unwrap();
        assert_eq!(value["model_name"], "lisflood");
        assert_eq!(value["parameters"]["region"]["type"], "string");
        assert_eq!(value["parameters"]["region"]["required"], true);
        assert_eq!(value["version"], "1.0.0");
    }

    #[test]
    fn test_metadata_deserialize_defaults() {
        let tool: ToolMetadata = serde_json::from_value(json!({
            "name": "impact",
            "description": "Impact assessment",
            "model_name": "climada",
            "category": "analysis",
            "parameters": {"hazard": {"required": true}}
        }))
        .unwrap();
        assert!(tool.requires_environment);
        assert_eq!(tool.parameters["hazard"].kind, "any");
        assert_eq!(tool.required_parameters(), vec!["hazard"]);
    }
}
