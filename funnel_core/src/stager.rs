use crate::error::FunnelError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Writes `bytes` to `path` so that readers only ever see the old contents or
/// the new ones: the data goes to a temporary file in the same directory,
/// which is then renamed over `path`. The result is readable and writable by
/// the owner only.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    restrict_permissions(tmp.as_file())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

/// Owns the single staged input file the target reads from.
#[derive(Debug, Clone)]
pub struct Stager {
    path: PathBuf,
}

impl Stager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the staged file's contents with `bytes`.
    pub fn stage(&self, bytes: &[u8]) -> Result<(), FunnelError> {
        write_atomic(&self.path, bytes).map_err(|e| {
            FunnelError::io(
                format!("failed to create test file {}", self.path.display()),
                e,
            )
        })
    }
}
