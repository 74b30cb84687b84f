//! Execution router
//!
//! Admission control against a global concurrency ceiling, a priority queue
//! for overflow, and uniform result envelopes for every submission.

pub mod health;
pub mod queue;
pub mod scheduler;

pub use health::{BackendHealth, ExecutionState, HealthReport, HealthStatus, RouterStats};
pub use scheduler::{ExecutionRouter, CANCELLED_BY_USER};
