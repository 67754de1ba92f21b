//! Memory watchdog.
//!
//! Samples `/proc/<pid>/status` of the sandbox leader and its descendants,
//! records the peak resident set, and kills the process group once it passes
//! the limit. Runtimes that manage their own heap (V8, the Go runtime) rely
//! on this instead of an address-space rlimit.

use crate::child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const KIB: u64 = 1024;

/// Peak memory observed for one child, in KiB.
#[derive(Debug, Clone, Default)]
pub struct PeakMemory(Arc<AtomicU64>);

impl PeakMemory {
    /// Creates a zeroed peak.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, kib: u64) {
        self.0.fetch_max(kib, Ordering::Relaxed);
    }

    /// Returns the peak in MiB, rounded up, if anything was sampled.
    #[must_use]
    pub fn megabytes(&self) -> Option<u32> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            kib => Some(u32::try_from(kib.div_ceil(KIB)).unwrap_or(u32::MAX)),
        }
    }
}

/// Extracts a `kB` field such as `VmRSS` from a status file.
fn status_field(status: &str, field: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse::<u64>().ok()
    })
}

/// The larger of `VmRSS` and `VmHWM` in KiB.
fn resident_kib(status: &str) -> Option<u64> {
    let rss = status_field(status, "VmRSS");
    let hwm = status_field(status, "VmHWM");
    rss.max(hwm)
}

/// Direct children of `pid`, from its main thread's `children` file.
async fn children(pid: u32) -> Vec<u32> {
    tokio::fs::read_to_string(format!("/proc/{pid}/task/{pid}/children"))
        .await
        .map(|text| {
            text.split_whitespace()
                .filter_map(|p| p.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Resident memory of `leader` and its descendants, in KiB.
///
/// Returns `None` once the leader can no longer be sampled. Descendants
/// that exit mid-walk are skipped.
async fn tree_resident_kib(leader: u32) -> Option<u64> {
    let status = tokio::fs::read_to_string(format!("/proc/{leader}/status"))
        .await
        .ok()?;
    let mut total = resident_kib(&status)?;
    let mut pending = children(leader).await;
    while let Some(pid) = pending.pop() {
        if let Ok(status) = tokio::fs::read_to_string(format!("/proc/{pid}/status")).await {
            total += status_field(&status, "VmRSS").unwrap_or(0);
            pending.extend(children(pid).await);
        }
    }
    Some(total)
}

/// Polls until the child passes `limit_mb` or can no longer be sampled.
///
/// Returns true if the limit was exceeded, after killing the group.
pub async fn watch(pid: u32, limit_mb: u32, interval: Duration, peak: PeakMemory) -> bool {
    let limit_kib = u64::from(limit_mb) * KIB;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(kib) = tree_resident_kib(pid).await else {
            return false;
        };
        peak.record(kib);
        if kib > limit_kib {
            tracing::debug!(pid, resident_kib = kib, limit_mb, "memory limit exceeded");
            child::kill_group(pid);
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tnode\nVmPeak:\t  900000 kB\nVmHWM:\t   40960 kB\nVmRSS:\t   30720 kB\nThreads:\t7\n";

    #[test]
    fn parses_larger_of_rss_and_hwm() {
        assert_eq!(resident_kib(STATUS), Some(40_960));
    }

    #[test]
    fn reads_single_field() {
        assert_eq!(status_field(STATUS, "VmRSS"), Some(30_720));
        assert_eq!(status_field(STATUS, "VmSwap"), None);
    }

    #[test]
    fn missing_fields_yield_none() {
        assert_eq!(resident_kib("Name:\tzombie\nState:\tZ\n"), None);
    }

    #[test]
    fn peak_rounds_up_to_megabytes() {
        let peak = PeakMemory::new();
        assert_eq!(peak.megabytes(), None);
        peak.record(1025);
        peak.record(10);
        assert_eq!(peak.megabytes(), Some(2));
    }

    #[tokio::test]
    async fn missing_process_stops_watching() {
        let exceeded = watch(u32::MAX - 1, 128, Duration::from_millis(1), PeakMemory::new()).await;
        assert!(!exceeded);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn samples_the_current_process() {
        let kib = tree_resident_kib(std::process::id()).await.unwrap();
        assert!(kib > 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn kills_a_group_over_the_limit() {
        let mut process = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = process.id().unwrap();
        let peak = PeakMemory::new();

        let exceeded = watch(pid, 0, Duration::from_millis(5), peak.clone()).await;

        assert!(exceeded);
        assert!(peak.megabytes().is_some());
        let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
