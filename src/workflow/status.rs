//! Task and Workflow Status
//!
//! Lifecycle states for individual tasks plus the pure aggregation rule that
//! derives a workflow-level status from its member tasks.
//!
//! Task state machine:
//!
//! ```text
//! PENDING --> RUNNING --> SUCCESS | FAILED | TIMEOUT | CANCELLED
//!    |                                                    ^
//!    +----------------------------------------------------+
//!      (cancelled or timed out before a worker started it)
//! ```
//!
//! Transitions are monotonic: a task that reached a terminal state never
//! changes again, and RUNNING never falls back to PENDING.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a single task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created or submitted, not yet picked up by a worker
    Pending,
    /// A worker is executing the task
    Running,
    /// The worker finished and reported success
    Success,
    /// The worker ran and reported a failure
    Failed,
    /// The task exceeded its allowed wall-clock time
    Timeout,
    /// The task was cancelled before it could finish
    Cancelled,
}

impl TaskStatus {
    /// Returns true for states a task never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    /// Returns true while the task still occupies the backend.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Lowercase wire name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "timeout" => Ok(TaskStatus::Timeout),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!(
                "Unknown task status '{}'. Expected one of: pending, running, success, failed, timeout, cancelled",
                other
            )),
        }
    }
}

/// Aggregate state of a workflow, derived from its member tasks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// At least one task is still pending or running
    Running,
    /// Every task succeeded (or the workflow was empty)
    Success,
    /// At least one task failed or timed out
    Failed,
    /// At least one task was cancelled and none failed
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Success => "success",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derives a workflow status from the statuses of its tasks.
///
/// The rule, in priority order:
///
/// 1. Any `PENDING` or `RUNNING` task makes the workflow `RUNNING`.
/// 2. Otherwise any `FAILED` or `TIMEOUT` task makes it `FAILED`.
/// 3. Otherwise any `CANCELLED` task makes it `CANCELLED`.
/// 4. Otherwise every task succeeded and the workflow is `SUCCESS`.
///
/// An empty slice aggregates to `SUCCESS`: a workflow with nothing to do
/// completed everything it had.
pub fn aggregate_status(statuses: &[TaskStatus]) -> WorkflowStatus {
    let mut any_cancelled = false;
    let mut any_failed = false;

    for status in statuses {
        match status {
            TaskStatus::Pending | TaskStatus::Running => return WorkflowStatus::Running,
            TaskStatus::Failed | TaskStatus::Timeout => any_failed = true,
            TaskStatus::Cancelled => any_cancelled = true,
            TaskStatus::Success => {}
        }
    }

    if any_failed {
        WorkflowStatus::Failed
    } else if any_cancelled {
        WorkflowStatus::Cancelled
    } else {
        WorkflowStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::Timeout,
        TaskStatus::Cancelled,
    ];

    #[test]
    fn test_terminal_partition() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_aggregate_empty_is_success() {
        assert_eq!(aggregate_status(&[]), WorkflowStatus::Success);
    }

    #[test]
    fn test_aggregate_singletons() {
        assert_eq!(aggregate_status(&[TaskStatus::Pending]), WorkflowStatus::Running);
        assert_eq!(aggregate_status(&[TaskStatus::Running]), WorkflowStatus::Running);
        assert_eq!(aggregate_status(&[TaskStatus::Success]), WorkflowStatus::Success);
        assert_eq!(aggregate_status(&[TaskStatus::Failed]), WorkflowStatus::Failed);
        assert_eq!(aggregate_status(&[TaskStatus::Timeout]), WorkflowStatus::Failed);
        assert_eq!(aggregate_status(&[TaskStatus::Cancelled]), WorkflowStatus::Cancelled);
    }

    #[test]
    fn test_aggregate_any_active_wins() {
        for status in ALL {
            assert_eq!(
                aggregate_status(&[status, TaskStatus::Pending]),
                WorkflowStatus::Running
            );
            assert_eq!(
                aggregate_status(&[TaskStatus::Running, status]),
                WorkflowStatus::Running
            );
        }
    }

    #[test]
    fn test_aggregate_failure_beats_cancelled() {
        assert_eq!(
            aggregate_status(&[TaskStatus::Cancelled, TaskStatus::Failed]),
            WorkflowStatus::Failed
        );
        assert_eq!(
            aggregate_status(&[TaskStatus::Timeout, TaskStatus::Cancelled, TaskStatus::Success]),
            WorkflowStatus::Failed
        );
    }

    #[test]
    fn test_aggregate_cancelled_with_successes() {
        assert_eq!(
            aggregate_status(&[TaskStatus::Success, TaskStatus::Cancelled, TaskStatus::Success]),
            WorkflowStatus::Cancelled
        );
    }

    #[test]
    fn test_aggregate_all_success() {
        assert_eq!(
            aggregate_status(&[TaskStatus::Success; 4]),
            WorkflowStatus::Success
        );
    }

    #[test]
    fn test_aggregate_exhaustive_triples_match_rule() {
        // Brute-force every 3-task combination against a direct restatement
        // of the precedence rule.
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    let statuses = [a, b, c];
                    let expected = if statuses.iter().any(|s| s.is_active()) {
                        WorkflowStatus::Running
                    } else if statuses
                        .iter()
                        .any(|s| matches!(s, TaskStatus::Failed | TaskStatus::Timeout))
                    {
                        WorkflowStatus::Failed
                    } else if statuses.iter().any(|s| matches!(s, TaskStatus::Cancelled)) {
                        WorkflowStatus::Cancelled
                    } else {
                        WorkflowStatus::Success
                    };
                    assert_eq!(aggregate_status(&statuses), expected, "statuses: {:?}", statuses);
                }
            }
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Timeout).unwrap(), "\"timeout\"");
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in ALL {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("finished".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("SUCCESS".parse::<TaskStatus>().unwrap(), TaskStatus::Success);
        assert_eq!(" Running ".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
    }
}
