//! Client for the optional fixer service.
//!
//! A fixer receives each candidate before it is staged and answers with a
//! repaired version. Both directions are single netstring frames over one
//! connection that lives for the whole run.

use crate::connector::Backoff;
use crate::error::FunnelError;
use crate::netstring::{self, MAX_CANDIDATE_LEN, NetstringError};
use std::io::{BufReader, Read, Write};
use tracing::{debug, info};

/// Rewrites a candidate before it is staged.
pub trait Fixer {
    fn fix(&mut self, candidate: &[u8]) -> Result<Vec<u8>, FunnelError>;
}

/// Netstring client over any bidirectional byte stream.
pub struct FixerClient<S: Read + Write> {
    peer: String,
    stream: BufReader<S>,
    max_reply_len: usize,
}

impl<S: Read + Write> FixerClient<S> {
    pub fn new(peer: impl Into<String>, stream: S) -> Self {
        Self {
            peer: peer.into(),
            stream: BufReader::new(stream),
            max_reply_len: MAX_CANDIDATE_LEN,
        }
    }

    /// Overrides the ceiling applied to reply frames.
    pub fn with_max_reply_len(mut self, max_reply_len: usize) -> Self {
        self.max_reply_len = max_reply_len;
        self
    }

    pub fn send(&mut self, candidate: &[u8]) -> Result<(), FunnelError> {
        // writes bypass the read buffer
        netstring::write_frame(self.stream.get_mut(), candidate).map_err(|source| {
            FunnelError::Connectivity {
                peer: self.peer.clone(),
                source,
            }
        })
    }

    pub fn receive(&mut self) -> Result<Vec<u8>, FunnelError> {
        netstring::decode_with_limit(&mut self.stream, self.max_reply_len).map_err(|e| match e {
            NetstringError::Io(source) => FunnelError::Connectivity {
                peer: self.peer.clone(),
                source,
            },
            source => FunnelError::Protocol {
                peer: self.peer.clone(),
                source,
            },
        })
    }
}

impl<S: Read + Write> Fixer for FixerClient<S> {
    fn fix(&mut self, candidate: &[u8]) -> Result<Vec<u8>, FunnelError> {
        self.send(candidate)?;
        let fixed = self.receive()?;
        debug!(before = candidate.len(), after = fixed.len(), "fixed candidate");
        Ok(fixed)
    }
}

impl<F> Fixer for F
where
    F: FnMut(&[u8]) -> Result<Vec<u8>, FunnelError>,
{
    fn fix(&mut self, candidate: &[u8]) -> Result<Vec<u8>, FunnelError> {
        self(candidate)
    }
}

#[cfg(unix)]
pub use self::unix::connect_unix;

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::path::Path;

    /// Dials the fixer's Unix socket under `backoff`.
    pub fn connect_unix(
        path: &Path,
        backoff: &Backoff,
    ) -> Result<FixerClient<UnixStream>, FunnelError> {
        let peer = format!("fixer at {}", path.display());
        let stream = backoff.retry(&peer, || UnixStream::connect(path))?;
        info!(%peer, "fix socket is up");
        Ok(FixerClient::new(peer, stream))
    }
}
