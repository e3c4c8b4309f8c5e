//! Client side of the generator protocol.
//!
//! The generator hands out exactly one test case per TCP connection: the
//! client connects, reads until the server closes, and the bytes read are the
//! candidate. The very first connection after startup carries a readiness
//! message instead, which is drained by [`GeneratorClient::connect`].

use crate::connector::{Backoff, consume_handshake};
use crate::error::FunnelError;
use crate::netstring::MAX_CANDIDATE_LEN;
use sha1::{Digest as _, Sha1};
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Port the bundled local generator listens on.
pub const LOCAL_GENERATOR_PORT: u16 = 4141;

/// SHA-1 of a candidate's bytes as received from the generator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 20]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Self::from_hash(&Sha1::digest(bytes))
    }

    fn from_hash(hash: &[u8]) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(hash);
        Digest(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// One raw test input together with the digest of exactly those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    bytes: Vec<u8>,
    digest: Digest,
}

impl Candidate {
    pub fn new(bytes: Vec<u8>) -> Self {
        let digest = Digest::of(&bytes);
        Self { bytes, digest }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the candidate is larger than the loop accepts.
    pub fn is_oversized(&self) -> bool {
        self.bytes.len() > MAX_CANDIDATE_LEN
    }
}

/// Anything that can hand the fuzz loop its next candidate.
pub trait CandidateSource {
    fn next_candidate(&mut self) -> Result<Candidate, FunnelError>;
}

/// Reader adapter that hashes every byte passing through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha1,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
        }
    }

    pub fn finish(self) -> Digest {
        Digest::from_hash(&self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Reads one candidate from `stream` until end of stream.
///
/// At most one byte past [`MAX_CANDIDATE_LEN`] is consumed: that is enough to
/// tell the loop to skip the candidate without buffering all of it.
pub fn read_candidate<R: Read>(stream: R) -> io::Result<Candidate> {
    let mut reader = HashingReader::new(stream);
    let mut bytes = Vec::new();
    (&mut reader)
        .take(MAX_CANDIDATE_LEN as u64 + 1)
        .read_to_end(&mut bytes)?;
    let digest = reader.finish();
    Ok(Candidate { bytes, digest })
}

/// Fetches candidates from a remote generator, one connection per test.
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    addr: String,
}

impl GeneratorClient {
    /// Waits for the generator at `addr` to come up and drains its readiness
    /// message. A failure here aborts startup; it is not retried beyond
    /// `backoff`.
    pub fn connect(addr: &str, backoff: &Backoff) -> Result<Self, FunnelError> {
        let stream = backoff.connect_tcp(addr)?;
        consume_handshake(addr, stream)?;
        info!(addr, "generator is running");
        Ok(Self {
            addr: addr.to_string(),
        })
    }

    pub fn fetch(&self) -> Result<Candidate, FunnelError> {
        let connectivity = |source| FunnelError::Connectivity {
            peer: self.addr.clone(),
            source,
        };
        let stream = TcpStream::connect(&self.addr).map_err(connectivity)?;
        let candidate = read_candidate(stream).map_err(connectivity)?;
        debug!(len = candidate.len(), digest = %candidate.digest(), "fetched candidate");
        Ok(candidate)
    }
}

impl CandidateSource for GeneratorClient {
    fn next_candidate(&mut self) -> Result<Candidate, FunnelError> {
        self.fetch()
    }
}

/// A generator process started on this host from a seed corpus.
///
/// The child is killed and reaped on drop.
#[derive(Debug)]
pub struct LocalGenerator {
    child: Child,
    addr: String,
}

impl LocalGenerator {
    /// Checks `corpus_dir` and launches `radamsa` serving mutations of it on
    /// [`LOCAL_GENERATOR_PORT`].
    pub fn launch(corpus_dir: &Path) -> Result<Self, FunnelError> {
        Self::launch_with("radamsa", corpus_dir)
    }

    pub fn launch_with(program: &str, corpus_dir: &Path) -> Result<Self, FunnelError> {
        check_corpus_dir(corpus_dir)?;

        let child = Command::new(program)
            .args(["-n", "inf", "-o"])
            .arg(format!(":{LOCAL_GENERATOR_PORT}"))
            .arg("-r")
            .arg(corpus_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| FunnelError::Connectivity {
                peer: format!("local generator ({program})"),
                source,
            })?;

        let addr = format!("127.0.0.1:{LOCAL_GENERATOR_PORT}");
        info!(pid = child.id(), %addr, "launched local generator");
        Ok(Self { child, addr })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for LocalGenerator {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!(error = %e, "failed to kill local generator");
        }
        let _ = self.child.wait();
    }
}

/// Verifies the seed corpus is a readable directory; an empty one is allowed
/// but reported.
pub fn check_corpus_dir(corpus_dir: &Path) -> Result<(), FunnelError> {
    let meta = fs::metadata(corpus_dir).map_err(|e| {
        FunnelError::config(format!(
            "unable to open corpus dir {}: {e}",
            corpus_dir.display()
        ))
    })?;
    if !meta.is_dir() {
        return Err(FunnelError::config(format!(
            "corpus path {} is not a directory",
            corpus_dir.display()
        )));
    }
    let has_entries = fs::read_dir(corpus_dir)
        .map_err(|e| FunnelError::io(format!("failed to list {}", corpus_dir.display()), e))?
        .next()
        .is_some();
    if !has_entries {
        warn!(dir = %corpus_dir.display(), "no files in corpus directory");
    }
    info!(dir = %corpus_dir.display(), "corpus dir looks ok");
    Ok(())
}
