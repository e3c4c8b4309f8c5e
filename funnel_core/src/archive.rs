use crate::error::FunnelError;
use crate::generator::Digest;
use crate::stager::write_atomic;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::error;

/// Extension given to every crash record.
pub const CRASH_RECORD_SUFFIX: &str = "raw";

/// Directory of crash reproducers, one file per distinct input.
///
/// Records are named `<sha1-hex>.raw` after the input as the generator
/// produced it, so the same input always lands on the same record.
#[derive(Debug, Clone)]
pub struct CrashArchive {
    dir: PathBuf,
}

impl CrashArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, digest: &Digest) -> PathBuf {
        self.dir
            .join(format!("{}.{CRASH_RECORD_SUFFIX}", digest.to_hex()))
    }

    /// Persists `raw` under its digest's record name.
    ///
    /// If the write fails the input is hexdumped to stderr before the error is
    /// returned, so the reproducer survives at least in the terminal.
    pub fn save(&self, digest: &Digest, raw: &[u8]) -> Result<PathBuf, FunnelError> {
        let path = self.record_path(digest);
        if let Err(e) = write_atomic(&path, raw) {
            error!(path = %path.display(), error = %e, "failed to write crashfile!");
            let _ = io::stderr().lock().write_all(hex_dump(raw).as_bytes());
            error!("(that hexdump was the last test)");
            return Err(FunnelError::io(
                format!("failed to write crash record {}", path.display()),
                e,
            ));
        }
        Ok(path)
    }
}

/// Canonical hexdump: offset, sixteen hex bytes split in two groups of eight,
/// then the printable ASCII rendering between pipes.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 80);
    for (line, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{b:02x} ");
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
