use crate::error::FunnelError;
use crate::executor::PLACEHOLDER;
use crate::reporter::DEFAULT_REPORT_INTERVAL;
use crate::workdir::DEFAULT_STAGED_NAME;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Raw configuration as read from a TOML file and/or the command line.
///
/// Every field is optional here; [`FunnelConfig::validate`] decides what is
/// required and produces [`Settings`].
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FunnelConfig {
    /// Name of the staged input file inside `dest`.
    pub file_name: Option<String>,
    /// Directory for the staged file and the crash archive.
    pub dest: Option<PathBuf>,
    /// Seed corpus for a locally launched generator.
    pub corpus: Option<PathBuf>,
    /// Address of a remote generator.
    pub server: Option<String>,
    /// Unix socket of the fixer service.
    pub fixer: Option<PathBuf>,
    /// Per-execution timeout for the target, in seconds.
    pub timeout_secs: Option<u64>,
    /// Target command; `@@` marks where the staged path goes.
    #[serde(default)]
    pub command: Vec<String>,
    pub max_iterations: Option<u64>,
    pub report_interval_secs: Option<u64>,
}

impl FunnelConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, FunnelError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FunnelError::config(format!(
                "failed to read config file at {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content).map_err(|e| {
            FunnelError::config(format!("in config file {}: {e}", path.display()))
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, FunnelError> {
        toml::from_str(content)
            .map_err(|e| FunnelError::config(format!("failed to parse TOML: {e}")))
    }

    /// Layers `overrides` on top of `self`: any value set in `overrides`
    /// wins, and a non-empty override command replaces the configured one.
    /// `corpus` and `server` are one choice: setting either in `overrides`
    /// replaces both.
    pub fn merge(self, overrides: FunnelConfig) -> Self {
        let (corpus, server) = if overrides.corpus.is_some() || overrides.server.is_some() {
            (overrides.corpus, overrides.server)
        } else {
            (self.corpus, self.server)
        };
        Self {
            file_name: overrides.file_name.or(self.file_name),
            dest: overrides.dest.or(self.dest),
            corpus,
            server,
            fixer: overrides.fixer.or(self.fixer),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            command: if overrides.command.is_empty() {
                self.command
            } else {
                overrides.command
            },
            max_iterations: overrides.max_iterations.or(self.max_iterations),
            report_interval_secs: overrides.report_interval_secs.or(self.report_interval_secs),
        }
    }

    pub fn validate(self) -> Result<Settings, FunnelError> {
        let source = match (self.corpus, self.server) {
            (Some(_), Some(_)) => {
                return Err(FunnelError::config(
                    "a corpus directory and a generator server cannot be used together",
                ));
            }
            (None, None) => {
                return Err(FunnelError::config(
                    "need a corpus directory or a generator server address",
                ));
            }
            (Some(corpus), None) => GeneratorSource::Corpus(corpus),
            (None, Some(server)) if server.trim().is_empty() => {
                return Err(FunnelError::config("generator server address is empty"));
            }
            (None, Some(server)) => GeneratorSource::Remote(server),
        };

        let dest = self
            .dest
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or_else(|| FunnelError::config("a destination directory is required"))?;

        if self.command.is_empty() {
            return Err(FunnelError::config(format!(
                "minimum target command is: /path/to/target {PLACEHOLDER}"
            )));
        }
        if !self.command.iter().any(|arg| arg.contains(PLACEHOLDER)) {
            return Err(FunnelError::config(format!(
                "no substitute markers ( {PLACEHOLDER} ) in supplied command"
            )));
        }

        let timeout = match self.timeout_secs {
            Some(0) => return Err(FunnelError::config("target timeout must be positive")),
            secs => secs.map(Duration::from_secs),
        };

        let report_interval = match self.report_interval_secs {
            Some(0) => return Err(FunnelError::config("report interval must be positive")),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_REPORT_INTERVAL,
        };

        Ok(Settings {
            file_name: self
                .file_name
                .unwrap_or_else(|| DEFAULT_STAGED_NAME.to_string()),
            dest,
            source,
            fixer: self.fixer,
            timeout,
            command: self.command,
            max_iterations: self.max_iterations,
            report_interval,
        })
    }
}

/// Where candidates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorSource {
    /// Launch a local generator over this seed directory.
    Corpus(PathBuf),
    /// Use an already running generator at this address.
    Remote(String),
}

/// Validated settings for a fuzzing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub file_name: String,
    pub dest: PathBuf,
    pub source: GeneratorSource,
    pub fixer: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub command: Vec<String>,
    pub max_iterations: Option<u64>,
    pub report_interval: Duration,
}
