//! Tool registry with secondary indices
//!
//! Primary map: tool name → metadata. Two secondary indices (by category,
//! by backend) list tool names in registration order. Every mutation
//! updates all three maps before returning, so a reader never observes a
//! partially removed tool. The registry has a single owner; the router
//! shares it behind an async `RwLock`.

use crate::tools::types::{RegistryStats, ToolFilter, ToolMetadata};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};

/// Tool registry
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// Map of tool name to metadata
    tools: HashMap<String, ToolMetadata>,

    /// Category → tool names
    categories: HashMap<String, Vec<String>>,

    /// Backend → tool names
    backends: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; an existing entry with the same name is overwritten
    pub fn register(&mut self, metadata: ToolMetadata) {
        let name = metadata.name.clone();

        if let Some(previous) = self.tools.remove(&name) {
            warn!(tool = %name, "Tool already registered, overwriting");
            self.remove_from_indices(&previous);
        }

        push_unique(
            self.categories.entry(metadata.category.clone()).or_default(),
            &name,
        );
        push_unique(
            self.backends.entry(metadata.backend.clone()).or_default(),
            &name,
        );

        info!(tool = %name, model = %metadata.backend, "Registered tool");
        self.tools.insert(name, metadata);
    }

    /// Get tool metadata by name
    pub fn get(&self, name: &str) -> Option<&ToolMetadata> {
        self.tools.get(name)
    }

    /// Check if tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List tools matching every criterion of `filter`
    pub fn list(&self, filter: &ToolFilter) -> Vec<&ToolMetadata> {
        let mut tools: Vec<&ToolMetadata> = self
            .tools
            .values()
            .filter(|tool| filter.matches(tool))
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// All tool names
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Categories with at least one tool
    pub fn list_categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    /// Backends with at least one tool
    pub fn list_backends(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Tools in a category, in registration order
    pub fn tools_by_category(&self, category: &str) -> Vec<&ToolMetadata> {
        self.resolve(self.categories.get(category))
    }

    /// Tools owned by a backend, in registration order
    pub fn tools_by_backend(&self, backend: &str) -> Vec<&ToolMetadata> {
        self.resolve(self.backends.get(backend))
    }

    /// Case-insensitive search over name, description and tags
    pub fn search(&self, query: &str) -> Vec<&ToolMetadata> {
        let query = query.to_lowercase();
        let mut matches: Vec<&ToolMetadata> = self
            .tools
            .values()
            .filter(|tool| {
                tool.name.to_lowercase().contains(&query)
                    || tool.description.to_lowercase().contains(&query)
                    || tool.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
            })
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches
    }

    /// Remove a tool; returns false if it was not registered
    pub fn unregister(&mut self, name: &str) -> bool {
        match self.tools.remove(name) {
            Some(tool) => {
                self.remove_from_indices(&tool);
                info!(tool = %name, "Unregistered tool");
                true
            }
            None => false,
        }
    }

    /// Remove every tool owned by `backend`; returns how many were removed
    pub fn unregister_backend(&mut self, backend: &str) -> usize {
        let names = match self.backends.get(backend) {
            Some(names) => names.clone(),
            None => return 0,
        };

        let count = names.iter().filter(|name| self.unregister(name)).count();
        info!(model = %backend, count, "Unregistered backend tools");
        count
    }

    /// Registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_tools: self.tools.len(),
            total_categories: self.categories.len(),
            total_models: self.backends.len(),
            tools_by_category: self
                .categories
                .iter()
                .map(|(category, names)| (category.clone(), names.len()))
                .collect(),
            tools_by_model: self
                .backends
                .iter()
                .map(|(backend, names)| (backend.clone(), names.len()))
                .collect(),
        }
    }

    /// Export the whole registry as JSON
    pub fn export(&self) -> serde_json::Result<Value> {
        let mut tools = serde_json::Map::new();
        for (name, tool) in &self.tools {
            tools.insert(name.clone(), serde_json::to_value(tool)?);
        }

        Ok(json!({
            "tools": tools,
            "categories": self.categories,
            "models": self.backends,
            "stats": serde_json::to_value(self.stats())?,
        }))
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.tools.clear();
        self.categories.clear();
        self.backends.clear();
        info!("Cleared tool registry");
    }

    /// Get total number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn resolve(&self, names: Option<&Vec<String>>) -> Vec<&ToolMetadata> {
        names
            .map(|names| names.iter().filter_map(|name| self.tools.get(name)).collect())
            .unwrap_or_default()
    }

    fn remove_from_indices(&mut self, tool: &ToolMetadata) {
        remove_from_index(&mut self.categories, &tool.category, &tool.name);
        remove_from_index(&mut self.backends, &tool.backend, &tool.name);
    }
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|existing| existing == name) {
        names.push(name.to_string());
    }
}

/// Drop `name` from `index[key]`, removing the key once empty
fn remove_from_index(index: &mut HashMap<String, Vec<String>>, key: &str, name: &str) {
    if let Some(names) = index.get_mut(key) {
        names.retain(|existing| existing != name);
        if names.is_empty() {
            index.remove(key);
        }
    }
}
