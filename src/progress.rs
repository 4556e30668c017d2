//! Progress monitoring for running transforms.
//!
//! Two sources feed the shared [`TransformProgress`] state: the transform
//! tool's machine-parseable progress stream (`-progress pipe:1`, key=value
//! lines on stdout) and a fixed-interval size poller watching the growing
//! output file (used by the merge engine, where the concat demuxer reports
//! no usable out_time). An external status renderer reads the state through
//! the status registry without blocking either source.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;

use crate::config;

/// Shared progress state for one running transform or merge.
///
/// All fields are atomics so the event sources and the status renderer
/// never contend on a lock.
#[derive(Debug, Default)]
pub struct TransformProgress {
    /// Processed media time in microseconds (from out_time_us)
    processed_us: AtomicU64,
    /// Total media duration in microseconds, for percent/ETA math
    total_us: AtomicU64,
    /// Bytes written so far (total_size key, or the size poller)
    processed_bytes: AtomicU64,
    /// Expected output size in bytes, when known
    total_bytes: AtomicU64,
    /// Tool-reported speed multiplier, in thousandths (1.0x == 1000)
    speed_milli_x: AtomicU64,
    /// Wall-clock start of the current file, ms since the epoch
    started_epoch_ms: AtomicU64,
}

impl TransformProgress {
    pub fn new() -> Arc<Self> {
        let progress = Arc::new(Self::default());
        progress.clear();
        progress
    }

    /// Reset all counters before the next file in a batch.
    pub fn clear(&self) {
        self.processed_us.store(0, Ordering::Relaxed);
        self.total_us.store(0, Ordering::Relaxed);
        self.processed_bytes.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        self.speed_milli_x.store(0, Ordering::Relaxed);
        self.started_epoch_ms.store(now_epoch_ms(), Ordering::Relaxed);
    }

    pub fn set_total_time(&self, secs: f64) {
        self.total_us.store((secs * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    pub fn set_total_bytes(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn set_processed_bytes(&self, bytes: u64) {
        self.processed_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Apply one key=value line from the tool's progress stream.
    ///
    /// Prefers out_time_us; out_time_ms is also microseconds despite the name.
    pub fn apply_line(&self, line: &str) {
        let line = line.trim();
        if let Some(us) = line.strip_prefix("out_time_us=") {
            if let Ok(us) = us.parse::<u64>() {
                self.processed_us.store(us, Ordering::Relaxed);
            }
        } else if let Some(us) = line.strip_prefix("out_time_ms=") {
            if let Ok(us) = us.parse::<u64>() {
                self.processed_us.store(us, Ordering::Relaxed);
            }
        } else if let Some(size) = line.strip_prefix("total_size=") {
            if let Ok(size) = size.parse::<u64>() {
                self.processed_bytes.store(size, Ordering::Relaxed);
            }
        } else if let Some(speed) = line.strip_prefix("speed=") {
            if let Ok(x) = speed.trim_end_matches('x').trim().parse::<f64>() {
                self.speed_milli_x.store((x * 1000.0) as u64, Ordering::Relaxed);
            }
        } else if line == "progress=end" {
            let total = self.total_us.load(Ordering::Relaxed);
            if total > 0 {
                self.processed_us.store(total, Ordering::Relaxed);
            }
        }
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }

    /// Percent of media time processed (0-100).
    pub fn percent(&self) -> u8 {
        let total = self.total_us.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let processed = self.processed_us.load(Ordering::Relaxed);
        ((processed.saturating_mul(100)) / total).min(100) as u8
    }

    /// Throughput in bytes per second since the last clear.
    pub fn speed_bytes_sec(&self) -> f64 {
        let elapsed_ms = now_epoch_ms().saturating_sub(self.started_epoch_ms.load(Ordering::Relaxed));
        if elapsed_ms == 0 {
            return 0.0;
        }
        self.processed_bytes.load(Ordering::Relaxed) as f64 * 1000.0 / elapsed_ms as f64
    }

    /// Estimated seconds remaining, from the tool-reported speed multiplier.
    pub fn eta_seconds(&self) -> Option<u64> {
        let total = self.total_us.load(Ordering::Relaxed);
        let processed = self.processed_us.load(Ordering::Relaxed);
        let speed_milli = self.speed_milli_x.load(Ordering::Relaxed);
        if total == 0 || speed_milli == 0 || processed >= total {
            return None;
        }
        let remaining_us = total - processed;
        Some(remaining_us / 1000 / speed_milli.max(1))
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Feed the tool's stdout progress stream into the shared state until EOF.
pub async fn watch_stdout(stdout: ChildStdout, progress: Arc<TransformProgress>) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        progress.apply_line(&line);
    }
}

/// Sample the growing output file's size on a fixed interval.
///
/// Used as a progress proxy when the tool reports no usable media time.
/// The caller must abort the returned handle the instant the subprocess
/// exits so no polling loop leaks.
pub fn spawn_size_poller(output: PathBuf, progress: Arc<TransformProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config::progress::poll_interval());
        loop {
            interval.tick().await;
            if let Ok(meta) = tokio::fs::metadata(&output).await {
                progress.set_processed_bytes(meta.len());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_percent_from_out_time() {
        let p = TransformProgress::new();
        p.set_total_time(100.0);
        p.apply_line("out_time_us=25000000");
        assert_eq!(p.percent(), 25);
        p.apply_line("out_time_us=100000000");
        assert_eq!(p.percent(), 100);
    }

    #[test]
    fn test_out_time_ms_is_microseconds() {
        let p = TransformProgress::new();
        p.set_total_time(10.0);
        p.apply_line("out_time_ms=5000000");
        assert_eq!(p.percent(), 50);
    }

    #[test]
    fn test_progress_end_snaps_to_total() {
        let p = TransformProgress::new();
        p.set_total_time(60.0);
        p.apply_line("out_time_us=1000000");
        p.apply_line("progress=end");
        assert_eq!(p.percent(), 100);
    }

    #[test]
    fn test_total_size_and_speed() {
        let p = TransformProgress::new();
        p.apply_line("total_size=1048576");
        assert_eq!(p.processed_bytes(), 1048576);

        p.set_total_time(100.0);
        p.apply_line("out_time_us=50000000");
        p.apply_line("speed=2.0x");
        // 50s of media left at 2x tool speed
        assert_eq!(p.eta_seconds(), Some(25));
    }

    #[test]
    fn test_eta_unknown_without_total_or_speed() {
        let p = TransformProgress::new();
        assert_eq!(p.eta_seconds(), None);
        p.set_total_time(10.0);
        assert_eq!(p.eta_seconds(), None);
    }

    #[test]
    fn test_unknown_total_gives_zero_percent() {
        let p = TransformProgress::new();
        p.apply_line("out_time_us=123456");
        assert_eq!(p.percent(), 0);
    }

    #[test]
    fn test_clear_resets_counters() {
        let p = TransformProgress::new();
        p.set_total_time(10.0);
        p.apply_line("out_time_us=5000000");
        p.apply_line("total_size=42");
        p.clear();
        assert_eq!(p.percent(), 0);
        assert_eq!(p.processed_bytes(), 0);
    }
}
