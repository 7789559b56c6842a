//! SimFlow - Workflow Orchestration for Simulation Jobs
//!
//! A library for dispatching long-running containerized simulation jobs
//! (finite-element, molecular-dynamics, CFD solvers) through a broker
//! abstraction, with lifecycle tracking, timeouts, cooperative
//! cancellation, resource monitoring, and a persistent job history.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Data structures, parsing, and validation for workflow
//!   definitions, plus status aggregation
//! - [`submitter`]: The broker abstraction and a local process-backed
//!   submitter
//! - [`execution`]: Core engine driving workflows through a submitter
//! - [`monitoring`]: Per-task resource accounting and the append-only
//!   job history
//!
//! # Example
//!
//! ```rust,no_run
//! use simflow::execution::WorkflowEngine;
//! use simflow::monitoring::JobMonitor;
//! use simflow::submitter::LocalSubmitter;
//! use simflow::load_workflow;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let workflow = load_workflow("simulation.yaml")?;
//!
//!     // Wire the engine to the local backend with job monitoring
//!     let mut engine = WorkflowEngine::new(Arc::new(LocalSubmitter::new()));
//!     engine.set_monitor(Arc::new(JobMonitor::open("history.jsonl")?));
//!
//!     // Execute the workflow
//!     let outcome = engine.run(&workflow)?;
//!     println!("workflow finished: {}", outcome.status);
//!     Ok(())
//! }
//! ```

pub mod execution;
pub mod monitoring;
pub mod submitter;
pub mod workflow;

// Re-export commonly used types
pub use execution::engine::{WorkflowEngine, WorkflowOutcome};
pub use monitoring::history::HistoryStore;
pub use monitoring::monitor::JobMonitor;
pub use submitter::{LocalSubmitter, TaskSubmitter};
pub use workflow::model::{TaskSpec, Workflow};
pub use workflow::parser::load_workflow;
pub use workflow::status::{aggregate_status, TaskStatus, WorkflowStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "SimFlow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "SimFlow");
    }

    #[test]
    fn test_module_exports_task_spec() {
        let spec = TaskSpec::new("fenicsx", "python3 solve.py");
        assert_eq!(spec.tool, "fenicsx");
        assert_eq!(spec.display_name(), "fenicsx");
    }

    #[test]
    fn test_module_exports_workflow() {
        let workflow = Workflow::new();
        assert!(workflow.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
