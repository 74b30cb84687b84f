//! Named isolated execution environments
//!
//! Discovery, validation and timed command execution inside conda
//! environments.

pub mod manager;
mod process;
pub mod types;

pub use manager::{run_process, EnvironmentManager, BASE_ENVIRONMENT};
pub use types::{CommandOutput, EnvironmentDescriptor, EnvironmentInfo, ValidationReport};
