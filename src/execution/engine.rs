//! Workflow Execution Engine
//!
//! The core engine that orchestrates workflow execution including:
//! - Sequential and parallel scheduling through a pluggable submitter
//! - Pure status aggregation over per-task lifecycle states
//! - Workflow-level deadlines and single-task waits
//! - Cooperative cancellation with prompt wakeup
//! - Progress callbacks after every poll round
//! - Optional job monitoring with persisted records

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::monitoring::{JobMonitor, MonitorError, ResourceUsage};
use crate::submitter::{SubmitError, TaskHandle, TaskPoll, TaskSubmitter, WorkerReport};
use crate::workflow::{
    aggregate_status, validate_spec, validate_workflow, ExecutionMode, FailurePolicy, TaskSpec,
    TaskStatus, ValidationError, Workflow, WorkflowStatus,
};

use super::cancel::CancelToken;

/// Default cadence for polling live tasks.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors from the execution layer.
///
/// A worker that ran and reported a bad outcome is a task *status*, not an
/// error; these variants cover infrastructure problems only.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow: {0}")]
    Validation(#[from] ValidationError),

    #[error("submission failed: {0}")]
    Submission(#[from] SubmitError),

    #[error("task '{task_id}' did not finish within {timeout:?}")]
    TaskTimeout { task_id: String, timeout: Duration },

    #[error("cancellation failed: {0}")]
    Cancellation(String),

    #[error("wait interrupted by cancellation request")]
    Interrupted,

    #[error("monitoring failed: {0}")]
    Monitor(#[from] MonitorError),
}

/// Engine-side state for one task as it moves through its lifecycle.
///
/// A run starts `PENDING` with no broker handle; submission assigns the
/// handle and the start timestamp. Status changes are monotonic: once a
/// run is terminal it never changes again.
#[derive(Debug, Clone)]
pub struct TaskRun {
    spec: TaskSpec,
    handle: Option<TaskHandle>,
    status: TaskStatus,
    report: Option<WorkerReport>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    usage: Option<ResourceUsage>,
}

impl TaskRun {
    fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            handle: None,
            status: TaskStatus::Pending,
            report: None,
            error: None,
            started_at: None,
            finished_at: None,
            usage: None,
        }
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    /// Broker-assigned id, once the task has been submitted.
    pub fn task_id(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.task_id.as_str())
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Worker report, populated only for tasks that succeeded.
    pub fn report(&self) -> Option<&WorkerReport> {
        self.report.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn outcome(&self) -> TaskOutcome {
        let duration_seconds = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(seconds_between(start, end)),
            _ => None,
        };

        TaskOutcome {
            task_id: self.handle.as_ref().map(|h| h.task_id.clone()),
            name: self.spec.display_name().to_string(),
            tool: self.spec.tool.clone(),
            status: self.status,
            result: self.report.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_seconds,
            resource_usage: self.usage,
        }
    }
}

/// Immutable per-task result inside a [`WorkflowOutcome`].
///
/// `task_id` is `None` for tasks that were never submitted (cancelled or
/// skipped while still queued locally).
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: Option<String>,
    pub name: String,
    pub tool: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<ResourceUsage>,
}

/// Final result of a workflow run: the aggregate status plus one outcome
/// per task, in workflow order.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub status: WorkflowStatus,
    pub tasks: Vec<TaskOutcome>,
}

impl WorkflowOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == WorkflowStatus::Success
    }

    /// Looks up a task outcome by display name.
    pub fn task(&self, name: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// Point-in-time view of a running workflow, handed to progress callbacks
/// after every poll round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkflowProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub terminal: usize,
    pub status: WorkflowStatus,
    pub elapsed: Duration,
}

impl WorkflowProgress {
    fn of(runs: &[TaskRun], elapsed: Duration) -> Self {
        let statuses: Vec<TaskStatus> = runs.iter().map(|r| r.status).collect();
        let pending = statuses.iter().filter(|s| **s == TaskStatus::Pending).count();
        let running = statuses.iter().filter(|s| **s == TaskStatus::Running).count();

        Self {
            total: statuses.len(),
            pending,
            running,
            terminal: statuses.len() - pending - running,
            status: aggregate_status(&statuses),
            elapsed,
        }
    }
}

/// How one pass through the polling loop ended.
enum DriveEnd {
    AllTerminal,
    DeadlineExpired,
    CancelRequested,
}

/// Workflow execution engine.
///
/// Drives tasks through a [`TaskSubmitter`] according to the workflow's
/// execution mode and failure policy, aggregates their statuses, and
/// (when a monitor is attached) records every terminal task to the job
/// history.
///
/// # Example
///
/// ```rust,no_run
/// use simflow::execution::WorkflowEngine;
/// use simflow::submitter::LocalSubmitter;
/// use simflow::load_workflow;
/// use std::sync::Arc;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("simulation.yaml")?;
///     let engine = WorkflowEngine::new(Arc::new(LocalSubmitter::new()));
///
///     let outcome = engine.run(&workflow)?;
///     println!("workflow finished: {}", outcome.status);
///     Ok(())
/// }
/// ```
pub struct WorkflowEngine {
    submitter: Arc<dyn TaskSubmitter>,
    monitor: Option<Arc<JobMonitor>>,
    poll_interval: Duration,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl WorkflowEngine {
    /// Creates an engine on top of a shared submitter.
    pub fn new(submitter: Arc<dyn TaskSubmitter>) -> Self {
        Self {
            submitter,
            monitor: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Attaches a job monitor; every task that reaches a terminal state
    /// after submission gets a history record.
    pub fn set_monitor(&mut self, monitor: Arc<JobMonitor>) {
        self.monitor = Some(monitor);
    }

    /// Sets the polling cadence. Sub-millisecond intervals are clamped so
    /// a zero interval cannot busy-spin the broker.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval.max(Duration::from_millis(1));
    }

    /// Sets the wall-clock limit applied to whole workflow runs.
    ///
    /// When the limit elapses, every unfinished task is marked `TIMEOUT`,
    /// live tasks get a best-effort cancel, and the run returns its mixed
    /// outcome instead of raising.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Returns a clone of the engine's cancel token.
    ///
    /// Cancelling it from any thread (a signal handler, another worker)
    /// makes every waiting loop in this engine return promptly.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Executes a workflow to completion.
    ///
    /// 1. Validates the workflow.
    /// 2. Submits tasks per the execution mode (all up front for parallel,
    ///    one at a time for sequential).
    /// 3. Polls live tasks at the configured cadence until every task is
    ///    terminal, the workflow deadline expires, or cancellation is
    ///    requested.
    /// 4. Returns the aggregate status with one outcome per task.
    ///
    /// # Returns
    ///
    /// * `Ok(WorkflowOutcome)` - Every task reached a final state (which
    ///   may include failures, timeouts, and cancellations).
    /// * `Err` - Validation failed or the broker could not be driven
    ///   (submission, cancellation delivery, or history I/O).
    pub fn run(&self, workflow: &Workflow) -> Result<WorkflowOutcome, EngineError> {
        self.execute(workflow, &mut |_| {})
    }

    /// Like [`run`](WorkflowEngine::run), invoking `progress` after every
    /// poll round.
    pub fn run_with_progress<F>(
        &self,
        workflow: &Workflow,
        mut progress: F,
    ) -> Result<WorkflowOutcome, EngineError>
    where
        F: FnMut(&WorkflowProgress),
    {
        self.execute(workflow, &mut progress)
    }

    /// Validates and submits a single task, returning its live run.
    ///
    /// The run starts monitored (when a monitor is attached) and `PENDING`;
    /// drive it with [`wait_for_task`](WorkflowEngine::wait_for_task) or as
    /// part of a slice via [`wait_for_workflow`](WorkflowEngine::wait_for_workflow).
    pub fn submit_task(&self, spec: &TaskSpec) -> Result<TaskRun, EngineError> {
        validate_spec(spec)?;
        let mut run = TaskRun::new(spec.clone());
        self.submit_run(&mut run)?;
        Ok(run)
    }

    /// Polls a set of runs until every one is terminal.
    ///
    /// If `timeout` elapses first, unfinished tasks are marked `TIMEOUT`
    /// with a best-effort cancel for each live handle, and the aggregate
    /// status of the mixed set is returned. A workflow timeout never
    /// raises.
    pub fn wait_for_workflow<F>(
        &self,
        runs: &mut [TaskRun],
        timeout: Option<Duration>,
        mut progress: F,
    ) -> Result<WorkflowStatus, EngineError>
    where
        F: FnMut(&WorkflowProgress),
    {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        self.drive(runs, deadline, started, &mut progress)?;
        Ok(current_status(runs))
    }

    /// Polls a single run until it is terminal.
    ///
    /// Unlike the workflow-level wait, this *raises* a
    /// [`EngineError::TaskTimeout`] when `timeout` elapses. The task itself
    /// is left untouched: it is not cancelled and its eventual recorded
    /// status is whatever the worker reports.
    pub fn wait_for_task(
        &self,
        run: &mut TaskRun,
        timeout: Duration,
    ) -> Result<TaskStatus, EngineError> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Interrupted);
            }

            self.poll_run(run)?;
            if run.status.is_terminal() {
                return Ok(run.status);
            }

            let now = Instant::now();
            if now >= deadline {
                // Only this wait gives up; the task keeps running.
                return Err(EngineError::TaskTimeout {
                    task_id: run
                        .task_id()
                        .unwrap_or_else(|| run.spec.display_name())
                        .to_string(),
                    timeout,
                });
            }

            if self.cancel.wait_timeout(self.poll_interval.min(deadline - now)) {
                return Err(EngineError::Interrupted);
            }
        }
    }

    /// Cancels every task in `runs` that has not reached a terminal state.
    ///
    /// Unsubmitted tasks go directly to `CANCELLED`. Live tasks get a
    /// cancel request: an acknowledged cancel marks the task `CANCELLED`,
    /// an unacknowledged one leaves the task to its natural outcome (it may
    /// have finished already). A cancel that cannot be delivered at all is
    /// an error.
    pub fn cancel_workflow(&self, runs: &mut [TaskRun]) -> Result<(), EngineError> {
        self.cancel_runs(runs, false)
    }

    fn execute(
        &self,
        workflow: &Workflow,
        progress: &mut dyn FnMut(&WorkflowProgress),
    ) -> Result<WorkflowOutcome, EngineError> {
        validate_workflow(workflow)?;

        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);
        let mut runs: Vec<TaskRun> = workflow.tasks.iter().cloned().map(TaskRun::new).collect();

        if runs.is_empty() {
            debug!("Workflow is empty - nothing to execute");
            return Ok(self.build_outcome(&runs));
        }

        info!(
            "Executing workflow: {} task(s), {:?} mode",
            runs.len(),
            workflow.mode
        );

        match workflow.mode {
            ExecutionMode::Parallel => {
                self.execute_parallel(&mut runs, deadline, started, progress)?
            }
            ExecutionMode::Sequential => {
                self.execute_sequential(&mut runs, workflow.on_failure, deadline, started, progress)?
            }
        }

        let outcome = self.build_outcome(&runs);
        match outcome.status {
            WorkflowStatus::Success => {
                info!("Workflow finished: all {} task(s) succeeded", runs.len())
            }
            status => warn!(
                "Workflow finished: {} ({} of {} task(s) succeeded)",
                status,
                outcome.count(TaskStatus::Success),
                runs.len()
            ),
        }
        Ok(outcome)
    }

    /// Submits everything before polling anything.
    fn execute_parallel(
        &self,
        runs: &mut [TaskRun],
        deadline: Option<Instant>,
        started: Instant,
        progress: &mut dyn FnMut(&WorkflowProgress),
    ) -> Result<(), EngineError> {
        for i in 0..runs.len() {
            if let Err(e) = self.submit_run(&mut runs[i]) {
                self.abandon_runs(runs);
                return Err(e);
            }
        }
        self.drive(runs, deadline, started, progress)?;
        Ok(())
    }

    /// Submits task *i* only after task *i-1* is terminal.
    fn execute_sequential(
        &self,
        runs: &mut [TaskRun],
        policy: FailurePolicy,
        deadline: Option<Instant>,
        started: Instant,
        progress: &mut dyn FnMut(&WorkflowProgress),
    ) -> Result<(), EngineError> {
        for i in 0..runs.len() {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested - not submitting further tasks");
                self.cancel_runs(runs, false)?;
                break;
            }
            if deadline_passed(deadline) {
                self.expire_runs(runs)?;
                break;
            }

            self.submit_run(&mut runs[i])?;

            match self.drive(runs, deadline, started, progress)? {
                DriveEnd::AllTerminal => {
                    let status = runs[i].status;
                    if policy == FailurePolicy::AbortOnFailure
                        && matches!(status, TaskStatus::Failed | TaskStatus::Timeout)
                    {
                        warn!(
                            "Task '{}' ended {} - aborting workflow, {} task(s) skipped",
                            runs[i].spec.display_name(),
                            status,
                            runs.len() - i - 1
                        );
                        self.skip_remaining(&mut runs[i + 1..])?;
                        break;
                    }
                }
                DriveEnd::DeadlineExpired | DriveEnd::CancelRequested => break,
            }
        }
        Ok(())
    }

    /// Polls every live handle until no task is both live and non-terminal,
    /// the deadline expires, or cancellation is requested.
    fn drive(
        &self,
        runs: &mut [TaskRun],
        deadline: Option<Instant>,
        started: Instant,
        progress: &mut dyn FnMut(&WorkflowProgress),
    ) -> Result<DriveEnd, EngineError> {
        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested - stopping workflow");
                self.cancel_runs(runs, false)?;
                // One more round so unacknowledged tasks report their
                // freshest broker-side status before we hand the set back.
                self.poll_round(runs)?;
                progress(&WorkflowProgress::of(runs, started.elapsed()));
                return Ok(DriveEnd::CancelRequested);
            }

            if deadline_passed(deadline) {
                self.expire_runs(runs)?;
                progress(&WorkflowProgress::of(runs, started.elapsed()));
                return Ok(DriveEnd::DeadlineExpired);
            }

            let live = self.poll_round(runs)?;
            progress(&WorkflowProgress::of(runs, started.elapsed()));
            if live == 0 {
                return Ok(DriveEnd::AllTerminal);
            }

            let mut nap = self.poll_interval;
            if let Some(d) = deadline {
                nap = nap.min(d.saturating_duration_since(Instant::now()));
            }
            self.cancel.wait_timeout(nap);
        }
    }

    /// One pass over all live handles. Returns how many tasks remain
    /// non-terminal with a handle to poll.
    fn poll_round(&self, runs: &mut [TaskRun]) -> Result<usize, EngineError> {
        let mut live = 0;
        for run in runs.iter_mut() {
            if run.status.is_terminal() || run.handle.is_none() {
                continue;
            }
            self.poll_run(run)?;
            if !run.status.is_terminal() {
                live += 1;
            }
        }
        Ok(live)
    }

    fn poll_run(&self, run: &mut TaskRun) -> Result<(), EngineError> {
        let Some(handle) = run.handle.clone() else {
            return Ok(());
        };

        match self.submitter.poll(&handle) {
            Ok(poll) => self.apply_poll(run, poll),
            Err(SubmitError::UnknownHandle(_)) => {
                // The broker has no trace of the task; retrying cannot help.
                error!("Broker no longer knows task {}", handle.task_id);
                self.finish_run(
                    run,
                    TaskStatus::Failed,
                    None,
                    Some(format!("broker no longer knows task {}", handle.task_id)),
                )
            }
            Err(e) => {
                // Transient broker trouble: keep the task alive and try
                // again next round.
                warn!("Polling task {} failed: {}", handle.task_id, e);
                Ok(())
            }
        }
    }

    fn apply_poll(&self, run: &mut TaskRun, poll: TaskPoll) -> Result<(), EngineError> {
        match poll.status {
            TaskStatus::Pending => Ok(()),
            TaskStatus::Running => {
                if run.status == TaskStatus::Pending {
                    debug!("Task {} is running", run.task_id().unwrap_or("?"));
                    run.status = TaskStatus::Running;
                }
                Ok(())
            }
            status => {
                let returncode = poll.report.as_ref().and_then(|r| r.returncode);
                let error = match status {
                    TaskStatus::Success => None,
                    _ => poll
                        .report
                        .as_ref()
                        .and_then(|r| r.error.clone())
                        .or_else(|| Some(default_failure_reason(status).to_string())),
                };
                if status == TaskStatus::Success {
                    run.report = poll.report;
                }
                self.finish_run(run, status, returncode, error)
            }
        }
    }

    /// Moves a run to a terminal state exactly once: sets status and error,
    /// stops monitoring (recording the job), and stamps the finish time.
    fn finish_run(
        &self,
        run: &mut TaskRun,
        status: TaskStatus,
        returncode: Option<i32>,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        if run.status.is_terminal() {
            return Ok(());
        }

        run.status = status;
        run.error = error;

        match status {
            TaskStatus::Success => info!("Task '{}' succeeded", run.spec.display_name()),
            TaskStatus::Cancelled => info!("Task '{}' cancelled", run.spec.display_name()),
            _ => error!(
                "Task '{}' ended {}: {}",
                run.spec.display_name(),
                status,
                run.error.as_deref().unwrap_or("no detail")
            ),
        }

        if let (Some(monitor), Some(handle)) = (&self.monitor, &run.handle) {
            let record =
                monitor.stop_monitoring(&handle.task_id, status, returncode, run.error.clone())?;
            run.usage = Some(record.resource_usage);
            run.finished_at = Some(record.end_time);
        } else if run.started_at.is_some() {
            run.finished_at = Some(Utc::now());
        }

        Ok(())
    }

    fn submit_run(&self, run: &mut TaskRun) -> Result<(), EngineError> {
        let handle = self.submitter.submit(&run.spec)?;
        info!(
            "Submitted task '{}' as {}",
            run.spec.display_name(),
            handle.task_id
        );
        run.started_at = Some(Utc::now());
        run.handle = Some(handle);

        if let (Some(monitor), Some(handle)) = (&self.monitor, &run.handle) {
            monitor.start_monitoring(
                &handle.task_id,
                &run.spec.tool,
                &run.spec.script,
                &run.spec.params,
            )?;
        }
        Ok(())
    }

    fn cancel_runs(&self, runs: &mut [TaskRun], best_effort: bool) -> Result<(), EngineError> {
        for run in runs.iter_mut() {
            if run.status.is_terminal() {
                continue;
            }
            match run.handle.clone() {
                None => {
                    self.finish_run(
                        run,
                        TaskStatus::Cancelled,
                        None,
                        Some("cancelled before submission".to_string()),
                    )?;
                }
                Some(handle) => match self.submitter.cancel(&handle) {
                    Ok(true) => {
                        self.finish_run(
                            run,
                            TaskStatus::Cancelled,
                            None,
                            Some("cancelled on request".to_string()),
                        )?;
                    }
                    Ok(false) => {
                        debug!(
                            "Cancel for task {} not acknowledged - leaving its natural outcome",
                            handle.task_id
                        );
                    }
                    Err(e) if best_effort => {
                        warn!("Failed to deliver cancel for task {}: {}", handle.task_id, e);
                    }
                    Err(e) => {
                        return Err(EngineError::Cancellation(format!(
                            "could not deliver cancel for task {}: {}",
                            handle.task_id, e
                        )));
                    }
                },
            }
        }
        Ok(())
    }

    /// Marks every unfinished run `TIMEOUT` with a best-effort cancel for
    /// the live ones. The TIMEOUT verdict stands whether or not the cancel
    /// lands.
    fn expire_runs(&self, runs: &mut [TaskRun]) -> Result<(), EngineError> {
        let stragglers = runs.iter().filter(|r| !r.status.is_terminal()).count();
        warn!(
            "Workflow deadline exceeded with {} task(s) unfinished - marking them TIMEOUT",
            stragglers
        );

        for run in runs.iter_mut() {
            if run.status.is_terminal() {
                continue;
            }
            if let Some(handle) = run.handle.clone() {
                match self.submitter.cancel(&handle) {
                    Ok(acknowledged) => debug!(
                        "Cancel for overdue task {}: acknowledged={}",
                        handle.task_id, acknowledged
                    ),
                    Err(e) => warn!("Failed to cancel overdue task {}: {}", handle.task_id, e),
                }
            }
            self.finish_run(
                run,
                TaskStatus::Timeout,
                None,
                Some("did not finish before the workflow deadline".to_string()),
            )?;
        }
        Ok(())
    }

    /// Cancels submitted tasks after a mid-batch submission failure so the
    /// broker is not left running work nobody will collect.
    fn abandon_runs(&self, runs: &mut [TaskRun]) {
        for run in runs.iter_mut() {
            if run.status.is_terminal() {
                continue;
            }
            let Some(handle) = run.handle.clone() else {
                continue;
            };
            if let Err(e) = self.submitter.cancel(&handle) {
                warn!("Failed to cancel task {} during cleanup: {}", handle.task_id, e);
            }
            if let Err(e) = self.finish_run(
                run,
                TaskStatus::Cancelled,
                None,
                Some("abandoned after a submission failure".to_string()),
            ) {
                warn!("Failed to record abandoned task {}: {}", handle.task_id, e);
            }
        }
    }

    /// Marks not-yet-submitted runs `CANCELLED` without submitting them.
    fn skip_remaining(&self, rest: &mut [TaskRun]) -> Result<(), EngineError> {
        for run in rest.iter_mut() {
            if run.status.is_terminal() || run.handle.is_some() {
                continue;
            }
            self.finish_run(
                run,
                TaskStatus::Cancelled,
                None,
                Some("skipped after an earlier task failed".to_string()),
            )?;
        }
        Ok(())
    }

    fn build_outcome(&self, runs: &[TaskRun]) -> WorkflowOutcome {
        WorkflowOutcome {
            status: current_status(runs),
            tasks: runs.iter().map(TaskRun::outcome).collect(),
        }
    }
}

fn current_status(runs: &[TaskRun]) -> WorkflowStatus {
    let statuses: Vec<TaskStatus> = runs.iter().map(|r| r.status).collect();
    aggregate_status(&statuses)
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}

fn default_failure_reason(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Failed => "worker reported failure",
        TaskStatus::Timeout => "task exceeded its time limit",
        TaskStatus::Cancelled => "task was cancelled",
        _ => "task did not finish",
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end.signed_duration_since(start);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}
