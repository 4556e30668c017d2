use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Configuration constants for the media-mutation pipeline

/// FFmpeg binary path
/// Read once at startup from REMUXA_FFMPEG environment variable or defaults to "ffmpeg"
pub static FFMPEG_BIN: Lazy<String> = Lazy::new(|| env::var("REMUXA_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_string()));

/// FFprobe binary path
/// Read once at startup from REMUXA_FFPROBE environment variable or defaults to "ffprobe"
pub static FFPROBE_BIN: Lazy<String> =
    Lazy::new(|| env::var("REMUXA_FFPROBE").unwrap_or_else(|_| "ffprobe".to_string()));

/// Transform executor configuration
pub mod transform {
    use super::*;

    /// Number of CPU-heavy transform batches allowed to run at once.
    ///
    /// FFmpeg already parallelizes internally, so the gate caps system-wide
    /// CPU contention across unrelated tasks rather than per-file work.
    /// Read from REMUXA_CPU_SLOTS, minimum 1.
    pub static CPU_SLOTS: Lazy<usize> = Lazy::new(|| {
        env::var("REMUXA_CPU_SLOTS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1)
    });

    /// Whether the merge engine contends for the same CPU gate as transforms.
    ///
    /// The merge is a stream copy and treated as lighter-weight by default;
    /// set REMUXA_MERGE_USES_GATE=1 for strict CPU fairness.
    pub static MERGE_USES_GATE: Lazy<bool> = Lazy::new(|| {
        env::var("REMUXA_MERGE_USES_GATE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    });

    /// Maximum number of stderr bytes kept when surfacing a tool failure
    pub const STDERR_TAIL_BYTES: usize = 800;

    /// Thread count hint passed to the transform tool (half of logical cores, minimum 1)
    pub fn thread_hint() -> usize {
        (std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2) / 2).max(1)
    }
}

/// Interactive selection session configuration
pub mod session {
    use super::Duration;

    /// Overall deadline for a selection session (in seconds)
    pub const SELECTION_TIMEOUT_SECS: u64 = 180;

    /// Sub-timeout for the rename dialog (in seconds)
    pub const RENAME_TIMEOUT_SECS: u64 = 60;

    /// Selection session deadline duration
    pub fn selection_timeout() -> Duration {
        Duration::from_secs(SELECTION_TIMEOUT_SECS)
    }

    /// Rename sub-dialog timeout duration
    pub fn rename_timeout() -> Duration {
        Duration::from_secs(RENAME_TIMEOUT_SECS)
    }
}

/// Progress monitoring configuration
pub mod progress {
    use super::Duration;

    /// Interval between output-file size samples (in milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 1000;

    /// Size poll interval duration
    pub fn poll_interval() -> Duration {
        Duration::from_millis(POLL_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_hint_is_at_least_one() {
        assert!(transform::thread_hint() >= 1);
    }

    #[test]
    fn test_session_timeouts() {
        assert_eq!(session::selection_timeout(), Duration::from_secs(180));
        assert_eq!(session::rename_timeout(), Duration::from_secs(60));
    }
}
