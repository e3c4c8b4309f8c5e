use crate::stats::Stats;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

/// How often progress is reported by default.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Background thread that logs throughput on a fixed interval.
///
/// It only reads [`Stats`]; the fuzz loop never waits on it.
pub struct ProgressReporter {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(stats: Arc<Stats>, interval: Duration) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("progress".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let progress = stats.snapshot();
                            info!(
                                tests = progress.iterations,
                                crashes = progress.crashes,
                                elapsed_secs = progress.elapsed.as_secs(),
                                "{progress}"
                            );
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self { stop, handle })
    }

    /// Stops the reporter and waits for its thread to exit.
    pub fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.handle.join();
    }
}
