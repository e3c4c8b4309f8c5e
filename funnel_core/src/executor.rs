use crate::error::FunnelError;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Token replaced by the staged file path in the target command.
pub const PLACEHOLDER: &str = "@@";

/// How much of the target's stderr is kept for diagnostics.
const STDERR_CAPTURE_LIMIT: u64 = 64 * 1024;

/// Poll interval while waiting on a target that has a timeout.
const WAIT_POLL: Duration = Duration::from_millis(5);

/// How long stderr may stay open after an untimed target exits.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Markers that identify a sanitizer report on stderr.
const SANITIZER_MARKERS: &[&str] = &[
    "ERROR: AddressSanitizer",
    "ERROR: LeakSanitizer",
    "ERROR: MemorySanitizer",
    "WARNING: MemorySanitizer",
    "ERROR: ThreadSanitizer",
    "WARNING: ThreadSanitizer",
    "runtime error:",
];

/// The target invocation, with the staged path already substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    argv: Vec<String>,
    timeout: Option<Duration>,
}

impl TargetCommand {
    /// Replaces every occurrence of [`PLACEHOLDER`] in `argv` with
    /// `staged_path`. A command without any placeholder could never see the
    /// staged input and is rejected.
    pub fn resolve(
        argv: &[String],
        staged_path: &Path,
        timeout: Option<Duration>,
    ) -> Result<Self, FunnelError> {
        if argv.is_empty() {
            return Err(FunnelError::config(
                "minimum target command is: /path/to/target @@",
            ));
        }
        let staged = staged_path.to_string_lossy();
        let mut substitutions = 0;
        let argv = argv
            .iter()
            .map(|arg| {
                substitutions += arg.matches(PLACEHOLDER).count();
                arg.replace(PLACEHOLDER, &staged)
            })
            .collect();
        if substitutions == 0 {
            return Err(FunnelError::config(format!(
                "no substitute markers ( {PLACEHOLDER} ) in supplied command"
            )));
        }
        Ok(Self { argv, timeout })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Space-joined command line, for logs.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// What the triage collaborator concluded about one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoFault,
    Fault { diagnostic: String },
}

impl Outcome {
    pub fn is_fault(&self) -> bool {
        matches!(self, Outcome::Fault { .. })
    }
}

/// Runs the target once against the staged input and classifies the result.
pub trait Triage {
    fn run(&mut self, target: &TargetCommand) -> Result<Outcome, FunnelError>;
}

impl<F> Triage for F
where
    F: FnMut(&TargetCommand) -> Result<Outcome, FunnelError>,
{
    fn run(&mut self, target: &TargetCommand) -> Result<Outcome, FunnelError> {
        self(target)
    }
}

/// Built-in triage: spawns the target as a child process.
///
/// A fault is a death by a fault signal or a sanitizer report on stderr.
/// Ordinary non-zero exits and timeouts count as no fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTriage;

impl ProcessTriage {
    pub fn new() -> Self {
        ProcessTriage
    }

    fn wait_with_timeout(
        child: &mut Child,
        timeout: Option<Duration>,
    ) -> std::io::Result<Option<ExitStatus>> {
        let Some(timeout) = timeout else {
            return child.wait().map(Some);
        };
        let start_time = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if start_time.elapsed() > timeout {
                debug!("target timed out, killing...");
                child.kill()?;
                child.wait()?;
                return Ok(None);
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

impl Triage for ProcessTriage {
    fn run(&mut self, target: &TargetCommand) -> Result<Outcome, FunnelError> {
        let (program, args) = target
            .argv
            .split_first()
            .ok_or_else(|| FunnelError::config("empty target command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FunnelError::io(format!("failed to spawn command {program:?}"), e))?;

        // Drained on a thread so a chatty target cannot block on a full pipe.
        // The capture is sent as soon as the pipe closes or the limit is hit.
        let (captured_tx, captured_rx) = mpsc::channel();
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                let mut captured = Vec::new();
                let mut limited = stderr.take(STDERR_CAPTURE_LIMIT);
                let _ = limited.read_to_end(&mut captured);
                let _ = captured_tx.send(captured);
                let _ = std::io::copy(&mut limited.into_inner(), &mut std::io::sink());
            });
        }

        let started = Instant::now();
        let status = Self::wait_with_timeout(&mut child, target.timeout)
            .map_err(|e| FunnelError::io("error waiting for target", e))?;

        let Some(status) = status else {
            return Ok(Outcome::NoFault);
        };

        // A background process of the target may keep the pipe open after the
        // target itself exits; the reader is then left detached.
        let drain_budget = match target.timeout {
            Some(timeout) => timeout.saturating_sub(started.elapsed()).max(WAIT_POLL * 10),
            None => STDERR_DRAIN_GRACE,
        };
        let stderr = match captured_rx.recv_timeout(drain_budget) {
            Ok(captured) => captured,
            Err(_) => {
                debug!("target stderr still open after exit, classifying without it");
                Vec::new()
            }
        };

        Ok(classify(status, &String::from_utf8_lossy(&stderr)))
    }
}

/// Classifies a finished target from its exit status and captured stderr.
pub fn classify(status: ExitStatus, stderr: &str) -> Outcome {
    if let Some(line) = sanitizer_report(stderr) {
        return Outcome::Fault {
            diagnostic: line.to_string(),
        };
    }
    match fault_signal(status) {
        Some(diagnostic) => Outcome::Fault { diagnostic },
        None => Outcome::NoFault,
    }
}

fn sanitizer_report(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .find(|line| SANITIZER_MARKERS.iter().any(|m| line.contains(m)))
        .map(str::trim)
}

#[cfg(unix)]
fn fault_signal(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    let signal = status.signal()?;
    let name = match signal {
        4 => "SIGILL",
        5 => "SIGTRAP",
        6 => "SIGABRT",
        8 => "SIGFPE",
        11 => "SIGSEGV",
        #[cfg(target_os = "linux")]
        7 => "SIGBUS",
        #[cfg(target_os = "linux")]
        31 => "SIGSYS",
        #[cfg(not(target_os = "linux"))]
        10 => "SIGBUS",
        #[cfg(not(target_os = "linux"))]
        12 => "SIGSYS",
        _ => return None,
    };
    Some(format!("{name} (signal {signal})"))
}

#[cfg(not(unix))]
fn fault_signal(_status: ExitStatus) -> Option<String> {
    None
}
