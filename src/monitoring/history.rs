//! Job History Store
//!
//! Append-only JSON-Lines persistence for finished jobs, plus queries and
//! summary statistics over the stored records.
//!
//! Concurrency contract: every record is serialized to one complete line and
//! written with a single write call under a writer lock, so parallel appends
//! interleave at line granularity only. Readers open their own handle and
//! skip lines that do not parse, so a torn trailing line left by a crashed
//! writer never poisons reads.

use std::collections::BTreeMap;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::monitoring::probe::ResourceUsage;
use crate::workflow::status::TaskStatus;

/// Default history location.
///
/// Priority order:
/// 1. `SIMFLOW_HISTORY` environment variable
/// 2. `~/.simflow/history.jsonl`
pub static DEFAULT_HISTORY_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(custom) = env::var("SIMFLOW_HISTORY") {
        return PathBuf::from(custom);
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".simflow").join("history.jsonl")
});

/// Errors from the history layer.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Immutable record of one finished job.
///
/// Written exactly once, when the job reaches a terminal state; there is no
/// update or delete path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub task_id: String,
    pub tool: String,
    pub script: String,

    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Derived from the two timestamps at record-build time
    pub duration_seconds: f64,

    pub status: TaskStatus,

    #[serde(default)]
    pub returncode: Option<i32>,

    pub resource_usage: ResourceUsage,

    #[serde(default)]
    pub error: Option<String>,

    /// Whether the worker produced a result payload
    #[serde(default)]
    pub has_result: bool,
}

/// Append-only JSON-Lines store for job records.
pub struct HistoryStore {
    path: PathBuf,
    writer: Mutex<File>,
}

impl HistoryStore {
    /// Opens the store at `path`, creating the file and its parent
    /// directories as needed.
    ///
    /// If the file exists but does not end with a newline (a writer crashed
    /// mid-append), a newline is written first so the torn fragment stays
    /// confined to its own line.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1))?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                warn!(
                    "History file '{}' did not end with a newline; sealing torn record",
                    path.display()
                );
                file.write_all(b"\n")?;
            }
        }

        debug!("History store opened at {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Opens the store at [`DEFAULT_HISTORY_PATH`].
    pub fn open_default() -> Result<Self, HistoryError> {
        Self::open(DEFAULT_HISTORY_PATH.as_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a complete line.
    pub fn append(&self, record: &JobRecord) -> Result<(), HistoryError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        {
            let mut file = self.writer.lock().unwrap_or_else(|p| p.into_inner());
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }

        debug!(
            "Appended job record for task {} ({})",
            record.task_id, record.status
        );
        Ok(())
    }

    /// Reads every parseable record in append order.
    pub fn records(&self) -> Result<Vec<JobRecord>, HistoryError> {
        let mut records = Vec::new();
        self.scan(|record| records.push(record))?;
        Ok(records)
    }

    /// Starts a filtered query over the stored records.
    pub fn query(&self) -> HistoryQuery<'_> {
        HistoryQuery {
            store: self,
            tool: None,
            status: None,
            limit: None,
        }
    }

    /// Computes summary statistics over every stored record in one pass.
    pub fn summary(&self) -> Result<SummaryStatistics, HistoryError> {
        let mut stats = SummaryStatistics::default();

        self.scan(|record| {
            stats.total_jobs += 1;
            stats.total_cpu_seconds += record.resource_usage.cpu_total_seconds;
            stats.total_duration_seconds += record.duration_seconds;

            let tool = stats.per_tool.entry(record.tool.clone()).or_default();
            tool.total_jobs += 1;
            tool.total_cpu_seconds += record.resource_usage.cpu_total_seconds;
            tool.total_duration_seconds += record.duration_seconds;

            if record.status == TaskStatus::Success {
                stats.succeeded += 1;
                tool.succeeded += 1;
            } else {
                stats.failed += 1;
                tool.failed += 1;
            }
        })?;

        stats.finalize();
        Ok(stats)
    }

    /// Streams records to `f` in append order, skipping unparseable lines.
    fn scan<F: FnMut(JobRecord)>(&self, mut f: F) -> Result<(), HistoryError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JobRecord>(&line) {
                Ok(record) => f(record),
                Err(e) => warn!(
                    "Skipping unparseable history line {} in '{}': {}",
                    lineno + 1,
                    self.path.display(),
                    e
                ),
            }
        }

        Ok(())
    }
}

/// Lazily-built filter over stored records.
///
/// ```rust,no_run
/// use simflow::monitoring::HistoryStore;
/// use simflow::workflow::TaskStatus;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = HistoryStore::open_default()?;
///     let recent_failures = store
///         .query()
///         .for_tool("lammps")
///         .with_status(TaskStatus::Failed)
///         .with_limit(10)
///         .run()?;
///     println!("{} recent failures", recent_failures.len());
///     Ok(())
/// }
/// ```
pub struct HistoryQuery<'a> {
    store: &'a HistoryStore,
    tool: Option<String>,
    status: Option<TaskStatus>,
    limit: Option<usize>,
}

impl HistoryQuery<'_> {
    /// Keeps only records for the given tool.
    pub fn for_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Keeps only records with the given terminal status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Keeps only the N most recent matches.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Runs the query. Results are newest first.
    pub fn run(&self) -> Result<Vec<JobRecord>, HistoryError> {
        let mut matches = Vec::new();

        self.store.scan(|record| {
            if let Some(tool) = &self.tool {
                if record.tool != *tool {
                    return;
                }
            }
            if let Some(status) = self.status {
                if record.status != status {
                    return;
                }
            }
            matches.push(record);
        })?;

        matches.reverse();
        if let Some(limit) = self.limit {
            matches.truncate(limit);
        }

        Ok(matches)
    }
}

/// Aggregates over a set of job records.
///
/// `success_rate` is a percentage in `[0, 100]`; "failed" counts every
/// non-success terminal state, timeouts and cancellations included.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SummaryStatistics {
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub total_cpu_seconds: f64,
    pub average_cpu_seconds: f64,
    pub total_duration_seconds: f64,
    pub average_duration_seconds: f64,
    pub per_tool: BTreeMap<String, ToolStatistics>,
}

/// Per-tool slice of the summary.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ToolStatistics {
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub total_cpu_seconds: f64,
    pub average_cpu_seconds: f64,
    pub total_duration_seconds: f64,
    pub average_duration_seconds: f64,
}

impl SummaryStatistics {
    fn finalize(&mut self) {
        if self.total_jobs > 0 {
            let n = self.total_jobs as f64;
            self.success_rate = self.succeeded as f64 * 100.0 / n;
            self.average_cpu_seconds = self.total_cpu_seconds / n;
            self.average_duration_seconds = self.total_duration_seconds / n;
        }

        for tool in self.per_tool.values_mut() {
            if tool.total_jobs > 0 {
                let n = tool.total_jobs as f64;
                tool.success_rate = tool.succeeded as f64 * 100.0 / n;
                tool.average_cpu_seconds = tool.total_cpu_seconds / n;
                tool.average_duration_seconds = tool.total_duration_seconds / n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn make_record(task_id: &str, tool: &str, status: TaskStatus, cpu: f64, duration: f64) -> JobRecord {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds((duration * 1000.0) as i64);

        JobRecord {
            task_id: task_id.to_string(),
            tool: tool.to_string(),
            script: "python3 solve.py".to_string(),
            params: [("mesh_size".to_string(), Value::from(32))].into_iter().collect(),
            start_time: start,
            end_time: end,
            duration_seconds: duration,
            status,
            returncode: Some(if status == TaskStatus::Success { 0 } else { 1 }),
            resource_usage: ResourceUsage {
                cpu_user_seconds: cpu * 0.8,
                cpu_system_seconds: cpu * 0.2,
                cpu_total_seconds: cpu,
                memory_peak_mb: 256.0,
            },
            error: (status != TaskStatus::Success).then(|| "boom".to_string()),
            has_result: status == TaskStatus::Success,
        }
    }

    #[test]
    fn test_append_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();

        let first = make_record("t1", "fenicsx", TaskStatus::Success, 1.5, 10.0);
        let second = make_record("t2", "lammps", TaskStatus::Failed, 0.5, 2.0);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], first);
        assert_eq!(records[1].task_id, "t2");
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("history.jsonl");

        let store = HistoryStore::open(&nested).unwrap();
        assert!(nested.exists());
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_reader_skips_torn_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        let store = HistoryStore::open(&path).unwrap();
        store.append(&make_record("t1", "fenicsx", TaskStatus::Success, 1.0, 5.0)).unwrap();

        // Simulate a writer dying mid-line.
        {
            let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
            raw.write_all(b"{\"task_id\":\"torn").unwrap();
        }

        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, "t1");
    }

    #[test]
    fn test_reopen_seals_torn_trailing_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        {
            let store = HistoryStore::open(&path).unwrap();
            store.append(&make_record("t1", "fenicsx", TaskStatus::Success, 1.0, 5.0)).unwrap();
            let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
            raw.write_all(b"{\"task_id\":\"torn").unwrap();
        }

        // A fresh process reopens the store and keeps appending.
        let store = HistoryStore::open(&path).unwrap();
        store.append(&make_record("t2", "lammps", TaskStatus::Success, 1.0, 5.0)).unwrap();

        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].task_id, "t2");
    }

    #[test]
    fn test_query_filters_by_tool_and_status() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();

        store.append(&make_record("t1", "fenicsx", TaskStatus::Success, 1.0, 1.0)).unwrap();
        store.append(&make_record("t2", "lammps", TaskStatus::Failed, 1.0, 1.0)).unwrap();
        store.append(&make_record("t3", "fenicsx", TaskStatus::Failed, 1.0, 1.0)).unwrap();

        let fenicsx = store.query().for_tool("fenicsx").run().unwrap();
        assert_eq!(fenicsx.len(), 2);

        let failed_fenicsx = store
            .query()
            .for_tool("fenicsx")
            .with_status(TaskStatus::Failed)
            .run()
            .unwrap();
        assert_eq!(failed_fenicsx.len(), 1);
        assert_eq!(failed_fenicsx[0].task_id, "t3");
    }

    #[test]
    fn test_query_newest_first_with_limit() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();

        for i in 0..5 {
            store
                .append(&make_record(&format!("t{}", i), "fenicsx", TaskStatus::Success, 1.0, 1.0))
                .unwrap();
        }

        let recent = store.query().with_limit(2).run().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task_id, "t4");
        assert_eq!(recent[1].task_id, "t3");
    }

    #[test]
    fn test_summary_exact_values() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();

        store.append(&make_record("t1", "fenicsx", TaskStatus::Success, 1.0, 10.0)).unwrap();
        store.append(&make_record("t2", "fenicsx", TaskStatus::Timeout, 2.0, 20.0)).unwrap();
        store.append(&make_record("t3", "lammps", TaskStatus::Success, 3.0, 30.0)).unwrap();

        let stats = store.summary().unwrap();
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((stats.total_cpu_seconds - 6.0).abs() < 1e-9);
        assert!((stats.average_cpu_seconds - 2.0).abs() < 1e-9);
        assert!((stats.total_duration_seconds - 60.0).abs() < 1e-9);
        assert!((stats.average_duration_seconds - 20.0).abs() < 1e-9);

        let fenicsx = &stats.per_tool["fenicsx"];
        assert_eq!(fenicsx.total_jobs, 2);
        assert_eq!(fenicsx.succeeded, 1);
        assert!((fenicsx.success_rate - 50.0).abs() < 1e-9);
        assert!((fenicsx.total_cpu_seconds - 3.0).abs() < 1e-9);

        let lammps = &stats.per_tool["lammps"];
        assert_eq!(lammps.total_jobs, 1);
        assert!((lammps.success_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_empty_store_is_all_zeros() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();

        let stats = store.summary().unwrap();
        assert_eq!(stats.total_jobs, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_cpu_seconds, 0.0);
        assert!(stats.per_tool.is_empty());
    }

    #[test]
    fn test_concurrent_appends_never_tear() {
        let dir = tempdir().unwrap();
        let store = Arc::new(HistoryStore::open(dir.path().join("history.jsonl")).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..25 {
                    let record = make_record(
                        &format!("t{}-{}", t, i),
                        "fenicsx",
                        TaskStatus::Success,
                        0.1,
                        1.0,
                    );
                    store.append(&record).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let records = store.records().unwrap();
        assert_eq!(records.len(), 100);

        let unique: std::collections::HashSet<_> =
            records.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(unique.len(), 100);
    }

    #[test]
    fn test_default_path_points_at_history_file() {
        if env::var("SIMFLOW_HISTORY").is_err() {
            assert_eq!(
                DEFAULT_HISTORY_PATH.file_name().and_then(|n| n.to_str()),
                Some("history.jsonl")
            );
        }
    }
}
