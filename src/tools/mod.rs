//! Tool catalog
//!
//! Tool metadata and the registry that indexes it by category and backend.

pub mod registry;
pub mod types;

// Re-export commonly used types
pub use registry::ToolRegistry;
pub use types::{ParameterSpec, RegistryStats, ToolFilter, ToolMetadata};
