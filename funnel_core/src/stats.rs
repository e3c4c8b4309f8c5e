use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared between the fuzz loop (the only writer) and the progress
/// reporter. Readers may see slightly stale values.
#[derive(Debug)]
pub struct Stats {
    started: Mutex<Instant>,
    iterations: AtomicU64,
    skipped: AtomicU64,
    crashes: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started: Instant) -> Self {
        Self {
            started: Mutex::new(started),
            iterations: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            crashes: AtomicU64::new(0),
        }
    }

    /// Moves the start of the clock to now, so setup time is not counted.
    pub fn restart(&self) {
        self.restart_at(Instant::now());
    }

    pub fn restart_at(&self, now: Instant) {
        *self.started.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn started(&self) -> Instant {
        *self.started.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn crashes(&self) -> u64 {
        self.crashes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Progress {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> Progress {
        let elapsed = now.saturating_duration_since(self.started());
        Progress {
            iterations: self.iterations(),
            crashes: self.crashes(),
            elapsed: Duration::from_secs(elapsed.as_secs()),
        }
    }
}

/// A point-in-time reading of [`Stats`], with elapsed time truncated to whole
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub iterations: u64,
    pub crashes: u64,
    pub elapsed: Duration,
}

impl Progress {
    /// Iterations per second; zero before the first full second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs();
        if secs == 0 {
            0.0
        } else {
            self.iterations as f64 / secs as f64
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tests in {} ({:.2} / s)",
            self.iterations,
            format_elapsed(self.elapsed),
            self.rate()
        )
    }
}

/// Renders whole seconds as `1h2m3s`, dropping leading zero units.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
