//! Job Monitoring Module
//!
//! Provides resource accounting and a persistent execution history for
//! simulation jobs.
//!
//! # Components
//!
//! - [`ResourceProbe`]: process-tree CPU and peak memory sampling
//! - [`JobMonitor`]: per-task baselines and lifecycle tracking
//! - [`HistoryStore`]: append-only JSONL job history with queries and
//!   summary statistics

pub mod history;
pub mod monitor;
pub mod probe;

pub use history::{
    HistoryError, HistoryQuery, HistoryStore, JobRecord, SummaryStatistics, ToolStatistics,
    DEFAULT_HISTORY_PATH,
};
pub use monitor::{JobMonitor, MonitorError, MonitorGuard};
pub use probe::{ResourceProbe, ResourceSnapshot, ResourceUsage};
