//! Shared value types
//!
//! The result envelope every execution returns, and the submission shape.

pub mod envelope;
pub mod request;

// Re-export commonly used types
pub use envelope::{
    ExecutionStatus, ModelResult, ResultBuilder, CANCELLATION_REASON_KEY, ROUTER_MODEL_NAME,
};
pub use request::{ExecutionRequest, Parameters};
