//! Task Submission Module
//!
//! The broker abstraction the engine talks to: a [`TaskSubmitter`] accepts
//! task specs, hands back opaque handles, and answers polls until the task
//! reaches a terminal state. Real solver adapters (finite-element, molecular
//! dynamics, CFD containers) sit behind remote broker deployments; [`local`]
//! provides an in-process backend that runs scripts as child processes for
//! development and testing.

pub mod local;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::workflow::model::TaskSpec;
use crate::workflow::status::TaskStatus;

pub use local::LocalSubmitter;

/// Opaque reference to a submitted task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    /// Broker-assigned task identifier
    pub task_id: String,

    /// Tool the task was routed to
    pub tool: String,
}

impl TaskHandle {
    pub fn new(task_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            tool: tool.into(),
        }
    }
}

/// Payload a worker produced for a finished task.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WorkerReport {
    /// Process exit code, when the backend exposes one
    #[serde(default)]
    pub returncode: Option<i32>,

    /// Captured standard output
    #[serde(default)]
    pub stdout: String,

    /// Captured standard error
    #[serde(default)]
    pub stderr: String,

    /// Files the task left behind in its scratch directory
    #[serde(default)]
    pub output_files: Vec<String>,

    /// Backend-specific extras (solver residuals, container image, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Worker-reported error message for unsuccessful runs
    #[serde(default)]
    pub error: Option<String>,
}

/// One poll response: where the task is now, plus the worker report once the
/// backend has one (terminal states only).
#[derive(Debug, Clone)]
pub struct TaskPoll {
    pub status: TaskStatus,
    pub report: Option<WorkerReport>,
}

impl TaskPoll {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            report: None,
        }
    }

    pub fn with_report(mut self, report: WorkerReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// Health classification for a backend.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting work normally
    Healthy,
    /// Accepting work but under pressure (low memory, at capacity)
    Degraded,
    /// Not accepting work
    Unhealthy,
}

/// Snapshot of a backend's ability to accept new tasks.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdapterHealth {
    pub status: HealthStatus,
    pub broker_reachable: bool,
    pub memory_available_mb: u64,
    pub active_tasks: usize,
    pub capacity: usize,

    /// Human-readable detail for degraded or unhealthy states
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Static description of a backend.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdapterMetadata {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

/// Errors surfaced by the submission layer.
///
/// A worker that ran and failed is not an error here; that outcome travels
/// through [`TaskPoll`] as a `FAILED` status. These variants cover the
/// infrastructure itself misbehaving.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("unknown task handle '{0}'")]
    UnknownHandle(String),

    #[error("cancel request for task '{task_id}' could not be delivered: {reason}")]
    CancelDelivery { task_id: String, reason: String },
}

/// Broker abstraction every compute backend implements.
///
/// Implementations must be shareable across threads: a single submitter
/// instance serves every workflow the engine runs concurrently, so interior
/// state needs its own synchronization.
pub trait TaskSubmitter: Send + Sync {
    /// Submits a task and returns its broker-assigned handle.
    fn submit(&self, spec: &TaskSpec) -> Result<TaskHandle, SubmitError>;

    /// Reports where a task is in its lifecycle.
    fn poll(&self, handle: &TaskHandle) -> Result<TaskPoll, SubmitError>;

    /// Requests cancellation of a task.
    ///
    /// `Ok(true)` means the backend acknowledged the cancel and will stop the
    /// task; `Ok(false)` means the request was delivered but the task had
    /// already finished (its natural outcome stands). A request that cannot
    /// be delivered at all is an `Err`.
    fn cancel(&self, handle: &TaskHandle) -> Result<bool, SubmitError>;

    /// Current ability of the backend to accept new work.
    fn health_check(&self) -> AdapterHealth;

    /// Static description of the backend.
    fn metadata(&self) -> AdapterMetadata;
}
