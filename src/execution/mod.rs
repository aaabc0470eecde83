//! Execution Engine (C6) and its priority work queues (spec.md §4.6).

pub mod engine;
pub mod queue;

pub use engine::{ExecutionConfig, ExecutionEngine};
pub use queue::{WorkItem, WorkPayload, WorkQueue};
