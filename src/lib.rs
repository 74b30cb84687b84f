//! MCP Router - Tool Execution Orchestration Engine
//!
//! Routes named tool invocations to registered model backends, enforces a
//! global concurrency ceiling, priority-queues overflow, and returns a
//! uniform result envelope for every submission.
//!
//! # Architecture
//!
//! - **types**: result envelope and submission shape
//! - **tools**: tool metadata and the indexed registry
//! - **environment**: named conda environments with timed command execution
//! - **backend**: the backend capability trait and a config-driven backend
//! - **router**: admission control, priority queue, health reporting

pub mod errors;
pub mod types;
pub mod tools;
pub mod environment;
pub mod backend;
pub mod router;

// Ambient configuration and logging
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use errors::{Result, RouterError};
pub use types::{ExecutionRequest, ExecutionStatus, ModelResult, Parameters};
pub use tools::{ParameterSpec, ToolFilter, ToolMetadata, ToolRegistry};
pub use environment::{EnvironmentManager, ValidationReport};
pub use backend::{CommandBackend, ModelBackend, RuntimeDescriptor};
pub use router::{ExecutionRouter, HealthReport};
pub use config::Config;
