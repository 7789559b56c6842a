//! Job Monitoring
//!
//! Tracks live jobs from submission to terminal state: a resource baseline
//! is captured per task when monitoring starts, and stopping computes the
//! usage delta and persists the immutable [`JobRecord`] to the history
//! store.
//!
//! Live state lives in a sharded concurrent map keyed by `task_id`, so
//! monitors for different tasks never wait on one another. Probe sampling
//! happens before the map entry is taken (start) or after it is removed
//! (stop), keeping syscalls outside any shard lock.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::monitoring::history::{HistoryError, HistoryStore, JobRecord};
use crate::monitoring::probe::{ResourceProbe, ResourceSnapshot, ResourceUsage};
use crate::workflow::status::TaskStatus;

/// Errors from the monitoring layer.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("task '{0}' is already being monitored")]
    DuplicateMonitor(String),

    #[error("task '{0}' is not being monitored")]
    UnknownTask(String),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Live per-task monitoring state.
#[derive(Debug, Clone)]
struct ActiveJob {
    tool: String,
    script: String,
    params: BTreeMap<String, Value>,
    started_at: DateTime<Utc>,
    baseline: ResourceSnapshot,
}

/// Tracks resource baselines for live jobs and writes one [`JobRecord`] per
/// job when it stops.
pub struct JobMonitor {
    store: HistoryStore,
    probe: ResourceProbe,
    active: DashMap<String, ActiveJob>,
}

impl JobMonitor {
    pub fn new(store: HistoryStore) -> Self {
        Self {
            store,
            probe: ResourceProbe::new(),
            active: DashMap::new(),
        }
    }

    /// Opens the history store at `path` and wraps it in a monitor.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        Ok(Self::new(HistoryStore::open(path)?))
    }

    /// Begins monitoring a task: records the start timestamp and captures
    /// the resource baseline.
    ///
    /// Starting a `task_id` that is already live is an error; broker ids
    /// are unique per submission, so a duplicate means caller confusion
    /// rather than a retry.
    pub fn start_monitoring(
        &self,
        task_id: impl Into<String>,
        tool: impl Into<String>,
        script: impl Into<String>,
        params: &BTreeMap<String, Value>,
    ) -> Result<(), MonitorError> {
        let task_id = task_id.into();
        let baseline = self.probe.snapshot();

        let job = ActiveJob {
            tool: tool.into(),
            script: script.into(),
            params: params.clone(),
            started_at: Utc::now(),
            baseline,
        };

        match self.active.entry(task_id.clone()) {
            Entry::Occupied(_) => Err(MonitorError::DuplicateMonitor(task_id)),
            Entry::Vacant(slot) => {
                slot.insert(job);
                debug!("Monitoring started for task {}", task_id);
                Ok(())
            }
        }
    }

    /// Stops monitoring a task, appends its immutable record to the history
    /// store, and returns the record.
    pub fn stop_monitoring(
        &self,
        task_id: &str,
        status: TaskStatus,
        returncode: Option<i32>,
        error: Option<String>,
    ) -> Result<JobRecord, MonitorError> {
        let (_, job) = self
            .active
            .remove(task_id)
            .ok_or_else(|| MonitorError::UnknownTask(task_id.to_string()))?;

        // The entry is out of the map; nothing below holds a shard lock.
        let current = self.probe.snapshot();
        let resource_usage = ResourceUsage::between(&job.baseline, &current);
        let end_time = Utc::now();
        let duration_seconds = duration_between(job.started_at, end_time);

        let record = JobRecord {
            task_id: task_id.to_string(),
            tool: job.tool,
            script: job.script,
            params: job.params,
            start_time: job.started_at,
            end_time,
            duration_seconds,
            status,
            returncode,
            resource_usage,
            error,
            has_result: status == TaskStatus::Success,
        };

        self.store.append(&record)?;
        info!(
            "Task {} finished: {} ({:.1}s wall, {:.2}s cpu)",
            task_id, status, duration_seconds, resource_usage.cpu_total_seconds
        );
        Ok(record)
    }

    /// Starts monitoring and returns a guard that guarantees a record gets
    /// written even if the surrounding scope unwinds.
    pub fn track(
        &self,
        task_id: impl Into<String>,
        tool: impl Into<String>,
        script: impl Into<String>,
        params: &BTreeMap<String, Value>,
    ) -> Result<MonitorGuard<'_>, MonitorError> {
        let task_id = task_id.into();
        self.start_monitoring(task_id.clone(), tool, script, params)?;
        Ok(MonitorGuard {
            monitor: self,
            task_id,
            finished: false,
        })
    }

    /// True while `task_id` has a live monitoring entry.
    pub fn is_monitoring(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
    }

    /// Number of live monitoring entries.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The underlying history store.
    pub fn history(&self) -> &HistoryStore {
        &self.store
    }
}

fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end.signed_duration_since(start);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Scope guard for a monitored job.
///
/// [`complete`](MonitorGuard::complete) consumes the guard and records the
/// real outcome. A guard dropped without completing (early return, panic)
/// records the job as `FAILED` so no live entry leaks.
pub struct MonitorGuard<'a> {
    monitor: &'a JobMonitor,
    task_id: String,
    finished: bool,
}

impl MonitorGuard<'_> {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Stops monitoring with the job's real outcome and returns its record.
    pub fn complete(
        mut self,
        status: TaskStatus,
        returncode: Option<i32>,
        error: Option<String>,
    ) -> Result<JobRecord, MonitorError> {
        self.finished = true;
        self.monitor
            .stop_monitoring(&self.task_id, status, returncode, error)
    }
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let reason = if std::thread::panicking() {
            "job aborted by panic"
        } else {
            "monitor scope exited without recording an outcome"
        };

        warn!("Task {} guard dropped; recording failure: {}", self.task_id, reason);
        if let Err(e) = self.monitor.stop_monitoring(
            &self.task_id,
            TaskStatus::Failed,
            None,
            Some(reason.to_string()),
        ) {
            warn!("Failed to record dropped job {}: {}", self.task_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn test_monitor(dir: &std::path::Path) -> JobMonitor {
        JobMonitor::open(dir.join("history.jsonl")).unwrap()
    }

    fn no_params() -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    #[test]
    fn test_start_stop_round_trip() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        let params: BTreeMap<String, Value> =
            [("mesh_size".to_string(), Value::from(64))].into_iter().collect();

        monitor
            .start_monitoring("t1", "fenicsx", "python3 solve.py", &params)
            .unwrap();
        assert!(monitor.is_monitoring("t1"));

        let record = monitor
            .stop_monitoring("t1", TaskStatus::Success, Some(0), None)
            .unwrap();

        assert!(!monitor.is_monitoring("t1"));
        assert_eq!(record.task_id, "t1");
        assert_eq!(record.tool, "fenicsx");
        assert_eq!(record.status, TaskStatus::Success);
        assert_eq!(record.returncode, Some(0));
        assert_eq!(record.params["mesh_size"], Value::from(64));
        assert!(record.has_result);

        // The persisted line parses back to exactly the returned record.
        let stored = monitor.history().records().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], record);
    }

    #[test]
    fn test_duration_matches_timestamps() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        monitor
            .start_monitoring("t1", "lammps", "lmp -in run.in", &no_params())
            .unwrap();
        thread::sleep(std::time::Duration::from_millis(30));
        let record = monitor
            .stop_monitoring("t1", TaskStatus::Success, Some(0), None)
            .unwrap();

        assert!(record.end_time >= record.start_time);
        assert!(record.duration_seconds >= 0.03);

        let recomputed = duration_between(record.start_time, record.end_time);
        assert_eq!(record.duration_seconds, recomputed);
    }

    #[test]
    fn test_duplicate_start_rejected() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        monitor
            .start_monitoring("t1", "fenicsx", "a", &no_params())
            .unwrap();
        let err = monitor
            .start_monitoring("t1", "fenicsx", "b", &no_params())
            .unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateMonitor(_)));

        // Stopping frees the id for a fresh run.
        monitor
            .stop_monitoring("t1", TaskStatus::Failed, Some(1), Some("x".into()))
            .unwrap();
        assert!(monitor
            .start_monitoring("t1", "fenicsx", "c", &no_params())
            .is_ok());
    }

    #[test]
    fn test_unknown_stop_rejected() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        let err = monitor
            .stop_monitoring("ghost", TaskStatus::Success, None, None)
            .unwrap_err();
        assert!(matches!(err, MonitorError::UnknownTask(_)));
    }

    #[test]
    fn test_failed_stop_has_no_result() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        monitor
            .start_monitoring("t1", "openfoam", "simpleFoam", &no_params())
            .unwrap();
        let record = monitor
            .stop_monitoring(
                "t1",
                TaskStatus::Failed,
                Some(2),
                Some("solver diverged".to_string()),
            )
            .unwrap();

        assert!(!record.has_result);
        assert_eq!(record.error.as_deref(), Some("solver diverged"));
    }

    #[test]
    fn test_usage_fields_are_sane() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        monitor
            .start_monitoring("t1", "fenicsx", "python3 solve.py", &no_params())
            .unwrap();

        // Burn a little CPU so the delta has something to measure.
        let mut acc: u64 = 0;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        assert!(acc != 1);

        let record = monitor
            .stop_monitoring("t1", TaskStatus::Success, Some(0), None)
            .unwrap();

        let usage = record.resource_usage;
        assert!(usage.cpu_user_seconds >= 0.0);
        assert!(usage.cpu_system_seconds >= 0.0);
        assert!(
            (usage.cpu_total_seconds - usage.cpu_user_seconds - usage.cpu_system_seconds).abs()
                < 1e-9
        );
        assert!(usage.memory_peak_mb > 0.0);
    }

    #[test]
    fn test_concurrent_monitors_on_disjoint_tasks() {
        let dir = tempdir().unwrap();
        let monitor = Arc::new(test_monitor(dir.path()));
        let barrier = Arc::new(Barrier::new(4));

        let mut handles = Vec::new();
        for t in 0..4 {
            let monitor = Arc::clone(&monitor);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..25 {
                    let id = format!("t{}-{}", t, i);
                    monitor
                        .start_monitoring(&id, "fenicsx", "python3 solve.py", &BTreeMap::new())
                        .unwrap();
                    monitor
                        .stop_monitoring(&id, TaskStatus::Success, Some(0), None)
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(monitor.active_count(), 0);
        assert_eq!(monitor.history().records().unwrap().len(), 100);
    }

    #[test]
    fn test_guard_complete_records_real_outcome() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        let guard = monitor
            .track("t1", "lammps", "lmp -in run.in", &no_params())
            .unwrap();
        assert_eq!(guard.task_id(), "t1");
        assert!(monitor.is_monitoring("t1"));

        let record = guard.complete(TaskStatus::Success, Some(0), None).unwrap();
        assert_eq!(record.status, TaskStatus::Success);
        assert!(!monitor.is_monitoring("t1"));
    }

    #[test]
    fn test_guard_drop_records_failure() {
        let dir = tempdir().unwrap();
        let monitor = test_monitor(dir.path());

        {
            let _guard = monitor
                .track("t1", "lammps", "lmp -in run.in", &no_params())
                .unwrap();
            // Dropped without complete().
        }

        assert!(!monitor.is_monitoring("t1"));
        let records = monitor.history().records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TaskStatus::Failed);
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("without recording"));
    }

    #[test]
    fn test_guard_drop_during_panic_records_failure() {
        let dir = tempdir().unwrap();
        let monitor = Arc::new(test_monitor(dir.path()));

        let inner = Arc::clone(&monitor);
        let result = thread::spawn(move || {
            let _guard = inner
                .track("t1", "fenicsx", "python3 solve.py", &BTreeMap::new())
                .unwrap();
            panic!("solver blew up");
        })
        .join();
        assert!(result.is_err());

        assert!(!monitor.is_monitoring("t1"));
        let records = monitor.history().records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TaskStatus::Failed);
        assert!(records[0].error.as_deref().unwrap().contains("panic"));
    }
}
