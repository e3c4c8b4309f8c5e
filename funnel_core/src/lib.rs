pub mod archive;
pub mod config;
pub mod connector;
pub mod error;
pub mod executor;
pub mod fixer;
pub mod fuzz_loop;
pub mod generator;
pub mod netstring;
pub mod reporter;
pub mod session;
pub mod stager;
pub mod stats;
pub mod workdir;

pub use archive::CrashArchive;
pub use config::{FunnelConfig, GeneratorSource, Settings};
pub use connector::Backoff;
pub use error::{FailureKind, FunnelError};
pub use executor::{Outcome, ProcessTriage, TargetCommand, Triage};
pub use fixer::{Fixer, FixerClient};
pub use fuzz_loop::{FuzzLoop, Iteration};
pub use generator::{Candidate, CandidateSource, Digest, GeneratorClient, LocalGenerator};
pub use netstring::{MAX_CANDIDATE_LEN, NetstringError};
pub use reporter::ProgressReporter;
pub use session::Session;
pub use stager::Stager;
pub use stats::{Progress, Stats};
pub use workdir::Workdir;
