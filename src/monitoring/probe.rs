//! Resource Probe
//!
//! Point-in-time snapshots of cumulative CPU time and peak memory for the
//! orchestrating process and its children, read through `getrusage(2)`.
//! Usage attributed to one job is the delta between the snapshot taken when
//! its monitoring started and the one taken when it stopped.
//!
//! `getrusage` is used instead of a process-table scan because job records
//! need the user/system CPU split and the kernel-maintained RSS high-water
//! mark, which also covers worker children that have already been reaped.

use log::warn;
use nix::sys::resource::{getrusage, UsageWho};
use serde::{Deserialize, Serialize};

/// Cumulative resource counters at one point in time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSnapshot {
    /// CPU seconds spent in user mode (self + reaped children)
    pub cpu_user_seconds: f64,

    /// CPU seconds spent in kernel mode (self + reaped children)
    pub cpu_system_seconds: f64,

    /// Peak resident set size observed so far, in megabytes
    pub memory_peak_mb: f64,
}

/// Resource consumption attributed to a single job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
    pub cpu_user_seconds: f64,
    pub cpu_system_seconds: f64,
    pub cpu_total_seconds: f64,
    pub memory_peak_mb: f64,
}

impl ResourceUsage {
    /// Usage between two snapshots: CPU time as deltas clamped at zero,
    /// memory as the later snapshot's high-water mark.
    pub fn between(baseline: &ResourceSnapshot, current: &ResourceSnapshot) -> Self {
        let cpu_user_seconds = (current.cpu_user_seconds - baseline.cpu_user_seconds).max(0.0);
        let cpu_system_seconds =
            (current.cpu_system_seconds - baseline.cpu_system_seconds).max(0.0);

        Self {
            cpu_user_seconds,
            cpu_system_seconds,
            cpu_total_seconds: cpu_user_seconds + cpu_system_seconds,
            memory_peak_mb: current.memory_peak_mb,
        }
    }
}

/// Samples `getrusage` for the current process and its children.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceProbe;

impl ResourceProbe {
    pub fn new() -> Self {
        Self
    }

    /// Takes a snapshot of the cumulative counters.
    ///
    /// A failing `getrusage` call contributes zeros and is logged; it does
    /// not happen on Linux for the SELF and CHILDREN targets.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let mut snap = ResourceSnapshot::default();

        for who in [UsageWho::RUSAGE_SELF, UsageWho::RUSAGE_CHILDREN] {
            match getrusage(who) {
                Ok(usage) => {
                    snap.cpu_user_seconds += timeval_seconds(usage.user_time());
                    snap.cpu_system_seconds += timeval_seconds(usage.system_time());
                    // ru_maxrss is reported in kilobytes on Linux
                    snap.memory_peak_mb = snap.memory_peak_mb.max(usage.max_rss() as f64 / 1024.0);
                }
                Err(e) => warn!("getrusage({:?}) failed: {}", who, e),
            }
        }

        snap
    }
}

fn timeval_seconds(tv: nix::sys::time::TimeVal) -> f64 {
    tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1_000_000.0
}
