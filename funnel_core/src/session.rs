use crate::archive::CrashArchive;
use crate::config::{GeneratorSource, Settings};
use crate::connector::Backoff;
use crate::error::FunnelError;
use crate::executor::{ProcessTriage, TargetCommand};
use crate::fuzz_loop::FuzzLoop;
use crate::generator::{GeneratorClient, LocalGenerator};
use crate::reporter::ProgressReporter;
use crate::stats::Stats;
use crate::workdir::Workdir;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A fully checked fuzzing setup, ready to run.
pub struct Session {
    fuzz_loop: FuzzLoop<GeneratorClient, ProcessTriage>,
    stats: Arc<Stats>,
    max_iterations: Option<u64>,
    report_interval: Duration,
    // Dropped last so the generator outlives the loop using it.
    _local_generator: Option<LocalGenerator>,
}

impl Session {
    /// Runs the startup checks in order, failing on the first problem:
    /// generator, destination, target command, then fixer.
    pub fn bootstrap(settings: Settings) -> Result<Self, FunnelError> {
        Self::bootstrap_with(settings, &Backoff::default())
    }

    pub fn bootstrap_with(settings: Settings, backoff: &Backoff) -> Result<Self, FunnelError> {
        let Settings {
            file_name,
            dest,
            source,
            fixer,
            timeout,
            command,
            max_iterations,
            report_interval,
        } = settings;

        let (local_generator, addr) = match source {
            GeneratorSource::Corpus(corpus) => {
                let local = LocalGenerator::launch(&corpus)?;
                let addr = local.addr().to_string();
                (Some(local), addr)
            }
            GeneratorSource::Remote(addr) => (None, addr),
        };
        let generator = GeneratorClient::connect(&addr, backoff)?;

        let workdir = Workdir::prepare(&dest, &file_name)?;

        let target = TargetCommand::resolve(&command, workdir.staged_path(), timeout)?;
        info!(command = %target.display(), "will be fuzzing");

        let stats = Arc::new(Stats::new());
        let mut fuzz_loop = FuzzLoop::new(
            generator,
            workdir.stager(),
            CrashArchive::new(workdir.crash_dir()),
            ProcessTriage::new(),
            target,
            Arc::clone(&stats),
        );

        if let Some(socket) = fixer {
            fuzz_loop = fuzz_loop.with_fixer(connect_fixer(&socket, backoff)?);
        }

        info!("everything looks good. Let's go!");
        Ok(Self {
            fuzz_loop,
            stats,
            max_iterations,
            report_interval,
            _local_generator: local_generator,
        })
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Drives the loop with the progress reporter alongside it. Returns when
    /// the iteration limit is reached or on the first fatal error.
    pub fn run(mut self) -> Result<(), FunnelError> {
        self.stats.restart();
        let reporter = ProgressReporter::spawn(Arc::clone(&self.stats), self.report_interval)
            .map_err(|e| FunnelError::io("failed to start progress reporter", e))?;

        let result = self.fuzz_loop.run(self.max_iterations);
        reporter.shutdown();

        info!(
            tests = self.stats.iterations(),
            skipped = self.stats.skipped(),
            crashes = self.stats.crashes(),
            "fuzz loop finished: {}",
            self.stats.snapshot()
        );
        result
    }
}

#[cfg(unix)]
fn connect_fixer(
    socket: &std::path::Path,
    backoff: &Backoff,
) -> Result<Box<dyn crate::fixer::Fixer>, FunnelError> {
    Ok(Box::new(crate::fixer::connect_unix(socket, backoff)?))
}

#[cfg(not(unix))]
fn connect_fixer(
    socket: &std::path::Path,
    _backoff: &Backoff,
) -> Result<Box<dyn crate::fixer::Fixer>, FunnelError> {
    Err(FunnelError::config(format!(
        "fix socket {} requires Unix domain sockets",
        socket.display()
    )))
}
