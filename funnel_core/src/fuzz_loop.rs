use crate::archive::CrashArchive;
use crate::error::FunnelError;
use crate::executor::{Outcome, TargetCommand, Triage};
use crate::fixer::Fixer;
use crate::generator::{CandidateSource, Digest};
use crate::stager::Stager;
use crate::stats::Stats;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one pass through the loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// The candidate exceeded the size ceiling and was dropped unseen.
    Skipped { len: usize },
    /// The target ran and nothing went wrong.
    Clean,
    /// The target faulted; the pre-fix input is archived at `record`.
    Fault {
        digest: Digest,
        diagnostic: String,
        record: PathBuf,
    },
}

/// One sequential worker: fetch, fix, stage, run, archive.
pub struct FuzzLoop<S, T> {
    source: S,
    fixer: Option<Box<dyn Fixer>>,
    stager: Stager,
    archive: CrashArchive,
    triage: T,
    target: TargetCommand,
    stats: Arc<Stats>,
}

impl<S: CandidateSource, T: Triage> FuzzLoop<S, T> {
    pub fn new(
        source: S,
        stager: Stager,
        archive: CrashArchive,
        triage: T,
        target: TargetCommand,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            source,
            fixer: None,
            stager,
            archive,
            triage,
            target,
            stats,
        }
    }

    pub fn with_fixer(mut self, fixer: Box<dyn Fixer>) -> Self {
        self.fixer = Some(fixer);
        self
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Runs a single iteration. Any error is fatal to the run.
    pub fn run_once(&mut self) -> Result<Iteration, FunnelError> {
        let candidate = self.source.next_candidate()?;
        if candidate.is_oversized() {
            debug!(len = candidate.len(), "skipping oversized candidate");
            self.stats.record_skip();
            return Ok(Iteration::Skipped {
                len: candidate.len(),
            });
        }

        match self.fixer.as_mut() {
            Some(fixer) => {
                let fixed = fixer.fix(candidate.bytes())?;
                self.stager.stage(&fixed)?;
            }
            None => self.stager.stage(candidate.bytes())?,
        }
        self.stats.record_iteration();

        match self.triage.run(&self.target)? {
            Outcome::NoFault => Ok(Iteration::Clean),
            Outcome::Fault { diagnostic } => {
                warn!(digest = %candidate.digest(), "Crash! - {diagnostic}");
                self.stats.record_crash();
                // the record holds the input as generated, never the fixed one
                let record = self.archive.save(&candidate.digest(), candidate.bytes())?;
                Ok(Iteration::Fault {
                    digest: candidate.digest(),
                    diagnostic,
                    record,
                })
            }
        }
    }

    /// Loops until `limit` candidates have been pulled (forever when `None`)
    /// or an iteration fails.
    pub fn run(&mut self, limit: Option<u64>) -> Result<(), FunnelError> {
        let mut pulled = 0u64;
        while limit.is_none_or(|limit| pulled < limit) {
            self.run_once()?;
            pulled += 1;
        }
        Ok(())
    }
}
