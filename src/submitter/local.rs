//! Local Process Backend
//!
//! Runs task scripts as local `bash` child processes, one worker thread per
//! task. This is the development and test backend; production deployments
//! put real solver adapters behind a remote broker implementing the same
//! [`TaskSubmitter`] trait.
//!
//! Each task gets a scratch directory holding its generated script; files a
//! task leaves there are reported back as `output_files`. Solver parameters
//! are exported to the script as `SIMFLOW_PARAM_*` environment variables.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde_json::Value;
use sysinfo::System;
use uuid::Uuid;

use crate::submitter::{
    AdapterHealth, AdapterMetadata, HealthStatus, SubmitError, TaskHandle, TaskPoll,
    TaskSubmitter, WorkerReport,
};
use crate::workflow::model::TaskSpec;
use crate::workflow::status::TaskStatus;
use crate::workflow::validator::validate_spec;

/// Cadence at which a worker thread checks its child process.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Below this much free memory the backend reports itself degraded.
const LOW_MEMORY_MB: u64 = 256;

/// Per-task state shared between the worker thread and the trait methods.
#[derive(Debug)]
struct LocalTask {
    status: TaskStatus,
    report: Option<WorkerReport>,
    cancel_requested: bool,
}

/// How a child process left the worker loop.
enum ChildOutcome {
    Exited(std::process::ExitStatus),
    Cancelled,
    TimedOut,
    WaitFailed(String),
}

/// Decrements the active-task counter when the worker thread ends, even if
/// it panics.
struct ActiveCount(Arc<AtomicUsize>);

impl ActiveCount {
    fn increment(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveCount {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process backend executing task scripts as bash child processes.
pub struct LocalSubmitter {
    tasks: DashMap<String, Arc<Mutex<LocalTask>>>,
    running: Arc<AtomicUsize>,
    max_workers: usize,
    scratch_root: PathBuf,
}

impl LocalSubmitter {
    /// Creates a backend with scratch space under the system temp directory
    /// and one worker slot per logical CPU.
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            running: Arc::new(AtomicUsize::new(0)),
            max_workers: num_cpus::get(),
            scratch_root: std::env::temp_dir().join("simflow"),
        }
    }

    /// Sets the worker-slot count used for health reporting.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Relocates the scratch root (tests point this at a temp directory).
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    fn slot(&self, task_id: &str) -> Result<Arc<Mutex<LocalTask>>, SubmitError> {
        self.tasks
            .get(task_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SubmitError::UnknownHandle(task_id.to_string()))
    }
}

impl Default for LocalSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSubmitter for LocalSubmitter {
    fn submit(&self, spec: &TaskSpec) -> Result<TaskHandle, SubmitError> {
        validate_spec(spec).map_err(|e| SubmitError::Rejected(e.to_string()))?;

        let task_id = Uuid::new_v4().to_string();
        let workdir = self.scratch_root.join(&task_id);
        fs::create_dir_all(&workdir).map_err(|e| {
            SubmitError::Unavailable(format!(
                "cannot create scratch directory '{}': {}",
                workdir.display(),
                e
            ))
        })?;

        let slot = Arc::new(Mutex::new(LocalTask {
            status: TaskStatus::Pending,
            report: None,
            cancel_requested: false,
        }));
        self.tasks.insert(task_id.clone(), Arc::clone(&slot));

        let spec_clone = spec.clone();
        let id = task_id.clone();
        let running = Arc::clone(&self.running);
        thread::spawn(move || run_task(id, spec_clone, slot, workdir, running));

        info!("Submitted task {} (tool: {}) to local backend", task_id, spec.tool);
        Ok(TaskHandle::new(task_id, spec.tool.clone()))
    }

    fn poll(&self, handle: &TaskHandle) -> Result<TaskPoll, SubmitError> {
        let slot = self.slot(&handle.task_id)?;
        let task = lock_task(&slot);

        debug!("Poll task {}: {}", handle.task_id, task.status);

        let mut poll = TaskPoll::new(task.status);
        if task.status.is_terminal() {
            if let Some(report) = &task.report {
                poll = poll.with_report(report.clone());
            }
        }
        Ok(poll)
    }

    fn cancel(&self, handle: &TaskHandle) -> Result<bool, SubmitError> {
        let slot = self.slot(&handle.task_id)?;
        let mut task = lock_task(&slot);

        if task.status.is_terminal() {
            debug!(
                "Cancel for task {} ignored; already {}",
                handle.task_id, task.status
            );
            return Ok(false);
        }

        task.cancel_requested = true;
        info!("Cancel requested for task {}", handle.task_id);
        Ok(true)
    }

    fn health_check(&self) -> AdapterHealth {
        let mut sys = System::new();
        sys.refresh_memory();

        let memory_available_mb = sys.available_memory() / (1024 * 1024);
        let active_tasks = self.running.load(Ordering::SeqCst);

        let mut status = HealthStatus::Healthy;
        let mut detail = None;

        if active_tasks >= self.max_workers {
            status = HealthStatus::Degraded;
            detail = Some(format!("all {} worker slots busy", self.max_workers));
        }
        if memory_available_mb < LOW_MEMORY_MB {
            status = HealthStatus::Degraded;
            detail = Some(format!("only {} MB of memory available", memory_available_mb));
        }

        AdapterHealth {
            status,
            broker_reachable: true,
            memory_available_mb,
            active_tasks,
            capacity: self.max_workers,
            detail,
        }
    }

    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            name: "local".to_string(),
            version: crate::VERSION.to_string(),
            capabilities: vec![
                "bash-script".to_string(),
                "cancel".to_string(),
                "timeout".to_string(),
                "params-env".to_string(),
            ],
        }
    }
}

/// Locks a task slot, recovering the data if a worker thread panicked while
/// holding the lock.
fn lock_task(slot: &Arc<Mutex<LocalTask>>) -> MutexGuard<'_, LocalTask> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Worker thread body: writes the script, runs it, watches for cancellation
/// and timeout, then records the outcome in the shared slot.
fn run_task(
    task_id: String,
    spec: TaskSpec,
    slot: Arc<Mutex<LocalTask>>,
    workdir: PathBuf,
    running: Arc<AtomicUsize>,
) {
    let _active = ActiveCount::increment(&running);

    // A cancel can race submission; honor it before doing any work.
    {
        let mut task = lock_task(&slot);
        if task.cancel_requested {
            task.status = TaskStatus::Cancelled;
            task.report = Some(WorkerReport {
                error: Some("cancelled before start".to_string()),
                ..Default::default()
            });
            info!("Task {} cancelled before start", task_id);
            return;
        }
        task.status = TaskStatus::Running;
    }

    let script_path = match write_task_script(&workdir, &spec) {
        Ok(path) => path,
        Err(e) => {
            finalize(
                &slot,
                &task_id,
                TaskStatus::Failed,
                WorkerReport {
                    error: Some(format!("failed to write task script: {}", e)),
                    ..Default::default()
                },
            );
            return;
        }
    };

    let mut cmd = Command::new("bash");
    cmd.arg(&script_path)
        .current_dir(&workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (key, value) in &spec.params {
        let env_value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        cmd.env(param_env_name(key), env_value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            finalize(
                &slot,
                &task_id,
                TaskStatus::Failed,
                WorkerReport {
                    error: Some(format!("failed to launch bash: {}", e)),
                    ..Default::default()
                },
            );
            return;
        }
    };

    debug!("Task {} started child pid {}", task_id, child.id());

    // Drain pipes on their own threads so a chatty child never blocks on a
    // full pipe while we poll it.
    let stdout_thread = child.stdout.take().map(capture_stream);
    let stderr_thread = child.stderr.take().map(capture_stream);

    let deadline = spec.timeout().map(|t| Instant::now() + t);

    let outcome = loop {
        match child.try_wait() {
            Ok(Some(exit)) => break ChildOutcome::Exited(exit),
            Ok(None) => {}
            Err(e) => break ChildOutcome::WaitFailed(e.to_string()),
        }

        if lock_task(&slot).cancel_requested {
            kill_child(&mut child, &task_id);
            break ChildOutcome::Cancelled;
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                kill_child(&mut child, &task_id);
                break ChildOutcome::TimedOut;
            }
        }

        thread::sleep(CHILD_POLL_INTERVAL);
    };

    let stdout = stdout_thread
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = stderr_thread
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();

    let (status, returncode, error) = match outcome {
        ChildOutcome::Exited(exit) => {
            if exit.success() {
                (TaskStatus::Success, exit.code(), None)
            } else {
                let reason = match exit.code() {
                    Some(code) => format!("script exited with status {}", code),
                    None => "script terminated by signal".to_string(),
                };
                (TaskStatus::Failed, exit.code(), Some(reason))
            }
        }
        ChildOutcome::Cancelled => (
            TaskStatus::Cancelled,
            None,
            Some("cancelled by request".to_string()),
        ),
        ChildOutcome::TimedOut => (
            TaskStatus::Timeout,
            None,
            Some(format!(
                "exceeded {}s wall-clock limit",
                spec.timeout_seconds.unwrap_or_default()
            )),
        ),
        ChildOutcome::WaitFailed(e) => (
            TaskStatus::Failed,
            None,
            Some(format!("failed to monitor child process: {}", e)),
        ),
    };

    let report = WorkerReport {
        returncode,
        stdout,
        stderr,
        output_files: list_output_files(&workdir, &script_path),
        metadata: [
            ("backend".to_string(), Value::from("local")),
            ("workdir".to_string(), Value::from(workdir.display().to_string())),
        ]
        .into_iter()
        .collect(),
        error,
    };

    finalize(&slot, &task_id, status, report);
}

/// Records the terminal outcome in the shared slot and logs it.
fn finalize(slot: &Arc<Mutex<LocalTask>>, task_id: &str, status: TaskStatus, report: WorkerReport) {
    match status {
        TaskStatus::Success => info!("Task {} completed successfully", task_id),
        TaskStatus::Failed => {
            error!("Task {} failed with exit code {:?}", task_id, report.returncode);
            if !report.stderr.trim().is_empty() {
                error!("Task {} stderr:\n{}", task_id, report.stderr);
            }
        }
        TaskStatus::Timeout => warn!("Task {} killed after exceeding its time limit", task_id),
        TaskStatus::Cancelled => info!("Task {} cancelled", task_id),
        _ => {}
    }

    let mut task = lock_task(slot);
    task.report = Some(report);
    task.status = status;
}

/// Writes the task's script into its scratch directory.
fn write_task_script(workdir: &Path, spec: &TaskSpec) -> std::io::Result<PathBuf> {
    let script_path = workdir.join("task.sh");
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", spec.script.trim_end())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

/// Kills a child process and reaps it.
fn kill_child(child: &mut Child, task_id: &str) {
    if let Err(e) = child.kill() {
        debug!("Kill for task {} returned: {}", task_id, e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap child for task {}: {}", task_id, e);
    }
}

/// Reads a child stream to completion on its own thread.
fn capture_stream<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = stream.read_to_end(&mut buf) {
            warn!("Failed to capture child output: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Files the task left in its scratch directory, excluding the script itself.
fn list_output_files(workdir: &Path, script_path: &Path) -> Vec<String> {
    let mut files = Vec::new();

    match fs::read_dir(workdir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if path == script_path {
                    continue;
                }
                if path.is_file() {
                    files.push(path.display().to_string());
                }
            }
        }
        Err(e) => warn!("Cannot list scratch directory '{}': {}", workdir.display(), e),
    }

    files.sort();
    files
}

/// Environment variable name a parameter is exported under.
fn param_env_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SIMFLOW_PARAM_{}", sanitized)
}
