//! Backend adapters
//!
//! The [`ModelBackend`] capability trait, the per-execution workspace
//! helper, and a configuration-driven [`CommandBackend`].

pub mod adapter;
pub mod command;
pub mod workspace;

pub use adapter::{ModelBackend, RuntimeDescriptor};
pub use command::{CommandBackend, CommandBackendConfig, CommandToolConfig};
pub use workspace::ExecutionWorkspace;
