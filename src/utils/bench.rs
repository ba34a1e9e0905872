//! Benchmark counters
//!
//! Real/user/system time snapshots for the `--benchmark` modes. Real time
//! is monotonic microseconds since the first snapshot; user and system
//! time come from the process rusage.

use std::sync::OnceLock;
use std::time::Instant;

use tracing::info;

/// One sample of the three process clocks, in microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchmarkTimestamps {
    pub real_usec: i64,
    pub user_usec: i64,
    pub sys_usec: i64,
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic microseconds since the process started sampling.
pub fn monotonic_micros() -> i64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

/// Snapshot all three clocks.
pub fn time_stamps() -> BenchmarkTimestamps {
    let mut stamps = BenchmarkTimestamps {
        real_usec: monotonic_micros(),
        user_usec: 0,
        sys_usec: 0,
    };

    #[cfg(unix)]
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            stamps.user_usec =
                usage.ru_utime.tv_sec as i64 * 1_000_000 + usage.ru_utime.tv_usec as i64;
            stamps.sys_usec =
                usage.ru_stime.tv_sec as i64 * 1_000_000 + usage.ru_stime.tv_usec as i64;
        }
    }

    stamps
}

/// Peak resident set size in bytes, 0 when unavailable.
pub fn max_rss() -> i64 {
    #[cfg(unix)]
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            return usage.ru_maxrss as i64 * 1024;
        }
    }
    0
}

/// Labelled interval measurement for `--benchmark-all`.
pub struct Bench {
    enabled_all: bool,
    last: BenchmarkTimestamps,
}

impl Bench {
    pub fn new(enabled_all: bool) -> Self {
        Self {
            enabled_all,
            last: time_stamps(),
        }
    }

    /// Log the clock deltas since the previous call under `label`, then
    /// reset the interval.
    pub fn update(&mut self, label: &str) {
        if !self.enabled_all {
            return;
        }
        let now = time_stamps();
        info!(
            "bench: {:8} user {:8} sys {:8} real {}",
            now.user_usec - self.last.user_usec,
            now.sys_usec - self.last.sys_usec,
            now.real_usec - self.last.real_usec,
            label
        );
        self.last = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let a = monotonic_micros();
        let b = monotonic_micros();
        assert!(b >= a);
    }

    #[test]
    fn snapshots_are_ordered() {
        let a = time_stamps();
        let b = time_stamps();
        assert!(b.real_usec >= a.real_usec);
        assert!(b.user_usec >= a.user_usec);
    }
}
