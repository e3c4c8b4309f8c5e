use crate::netstring::NetstringError;
use std::io;
use thiserror::Error;

/// The broad class a failure belongs to.
///
/// Every [`FunnelError`] maps onto exactly one kind, and each kind carries a
/// fixed decision about whether the fuzz loop may keep going after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Conflicting or missing settings, detected at startup.
    Configuration,
    /// A peer could not be reached, or stopped answering.
    Connectivity,
    /// A peer sent bytes that do not follow the wire format.
    Protocol,
    /// Local disk or process I/O failed.
    Io,
}

impl FailureKind {
    /// Whether a failure of this kind must terminate the run.
    ///
    /// Oversized candidates are not represented here: they are an ordinary
    /// loop outcome, not a failure.
    pub fn is_fatal(self) -> bool {
        match self {
            FailureKind::Configuration => true,
            FailureKind::Connectivity => true,
            // framing state of the connection cannot be trusted afterwards
            FailureKind::Protocol => true,
            // covers staging, archival and generator reads
            FailureKind::Io => true,
        }
    }
}

/// Errors raised by the funnel components.
#[derive(Error, Debug)]
pub enum FunnelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection to {peer} timed out after {attempts} attempts: {last_error}")]
    ConnectTimeout {
        peer: String,
        attempts: u32,
        last_error: String,
    },

    #[error("lost connection to {peer}: {source}")]
    Connectivity {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol violation from {peer}: {source}")]
    Protocol {
        peer: String,
        #[source]
        source: NetstringError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl FunnelError {
    pub fn config(message: impl Into<String>) -> Self {
        FunnelError::Config(message.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        FunnelError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FunnelError::Config(_) => FailureKind::Configuration,
            FunnelError::ConnectTimeout { .. } | FunnelError::Connectivity { .. } => {
                FailureKind::Connectivity
            }
            FunnelError::Protocol { .. } => FailureKind::Protocol,
            FunnelError::Io { .. } => FailureKind::Io,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}
