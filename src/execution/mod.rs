//! Workflow Execution Module
//!
//! Provides the core engine for driving workflows through a task
//! submitter, including sequential and parallel scheduling, timeouts,
//! and cooperative cancellation.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution engine orchestrating workflow runs
//! - [`cancel`]: Shared cancellation token with prompt wakeup

pub mod cancel;
pub mod engine;

pub use cancel::CancelToken;
pub use engine::{
    EngineError, TaskOutcome, TaskRun, WorkflowEngine, WorkflowOutcome, WorkflowProgress,
};
