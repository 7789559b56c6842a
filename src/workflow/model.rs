//! Workflow Data Model
//!
//! Core data structures describing simulation tasks and the workflows that
//! group them.
//!
//! # Example YAML Format
//!
//! ```yaml
//! mode: sequential
//! on_failure: abort-on-failure
//! tasks:
//!   - name: poisson_convergence
//!     tool: fenicsx
//!     script: |
//!       mpirun -n 4 python3 poisson.py --mesh-size 64
//!     params:
//!       mesh_size: 64
//!       degree: 2
//!     timeout_seconds: 3600
//!
//!   - name: md_equilibration
//!     tool: lammps
//!     script_file: scripts/equilibrate.sh
//!     timeout_seconds: 7200
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Describes a single simulation task to submit to a compute backend.
///
/// The spec is backend-agnostic: `tool` names the solver adapter the backend
/// should route to, `script` is the payload the worker executes, and `params`
/// travel alongside for the adapter to interpret.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskSpec {
    /// Optional human-readable label used in reports and logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Solver or tool this task targets (e.g. "fenicsx", "lammps", "openfoam")
    pub tool: String,

    /// Script body the worker executes
    #[serde(default)]
    pub script: String,

    /// Path to a file holding the script body; resolved into `script` by the
    /// workflow loader before validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,

    /// Solver parameters forwarded to the worker, JSON-representable
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,

    /// Per-task wall-clock limit in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl TaskSpec {
    /// Creates a new TaskSpec for the given tool and script.
    ///
    /// # Example
    ///
    /// ```
    /// use simflow::workflow::TaskSpec;
    /// use std::time::Duration;
    ///
    /// let spec = TaskSpec::new("fenicsx", "python3 poisson.py")
    ///     .with_name("poisson_demo")
    ///     .with_param("mesh_size", 64)
    ///     .with_timeout(Duration::from_secs(600));
    /// ```
    pub fn new(tool: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: None,
            tool: tool.into().trim().to_string(),
            script: script.into(),
            script_file: None,
            params: BTreeMap::new(),
            timeout_seconds: None,
        }
    }

    /// Sets the display name for this task.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into().trim().to_string());
        self
    }

    /// Adds a single solver parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Replaces the full parameter map.
    pub fn with_params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Sets the per-task wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = Some(timeout.as_secs().max(1));
        self
    }

    /// Per-task wall-clock limit as a `Duration`, if one was set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Label used in logs and reports: the explicit name, or the tool.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.tool)
    }
}

/// How the engine schedules a workflow's tasks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One task at a time, in list order
    #[default]
    Sequential,
    /// Every task submitted before any is polled
    Parallel,
}

/// What a sequential workflow does after a task fails or times out.
///
/// Parallel workflows ignore the policy: all tasks are already in flight by
/// the time a failure is observed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Later tasks still run; the outcome reports every task
    #[default]
    Continue,
    /// Remaining unsubmitted tasks go straight to cancelled
    #[serde(alias = "abort")]
    AbortOnFailure,
}

/// An ordered collection of tasks executed as a unit.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Workflow {
    /// Tasks in submission order
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,

    /// Scheduling mode
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Failure handling for sequential runs
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Workflow {
    /// Creates a new empty sequential workflow.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequential workflow from a list of tasks.
    pub fn sequential(tasks: Vec<TaskSpec>) -> Self {
        Self {
            tasks,
            mode: ExecutionMode::Sequential,
            on_failure: FailurePolicy::default(),
        }
    }

    /// Creates a parallel workflow from a list of tasks.
    pub fn parallel(tasks: Vec<TaskSpec>) -> Self {
        Self {
            tasks,
            mode: ExecutionMode::Parallel,
            on_failure: FailurePolicy::default(),
        }
    }

    /// Sets the scheduling mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Appends a task to the workflow.
    pub fn add_task(&mut self, spec: TaskSpec) {
        self.tasks.push(spec);
    }

    /// Distinct tools referenced by this workflow, sorted.
    pub fn tools(&self) -> Vec<String> {
        let set: BTreeSet<_> = self.tasks.iter().map(|t| t.tool.clone()).collect();
        set.into_iter().collect()
    }

    /// Returns the number of tasks in the workflow.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the workflow has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
