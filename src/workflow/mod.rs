//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing, and
//! validating simulation workflows.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (TaskSpec, Workflow)
//! - [`status`]: Task and workflow lifecycle states, status aggregation
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Validation rules

pub mod model;
pub mod parser;
pub mod status;
pub mod validator;

pub use model::{ExecutionMode, FailurePolicy, TaskSpec, Workflow};
pub use parser::{load_workflow, load_workflow_str};
pub use status::{aggregate_status, TaskStatus, WorkflowStatus};
pub use validator::{validate_spec, validate_workflow, ValidationError};
