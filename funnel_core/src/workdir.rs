use crate::error::FunnelError;
use crate::stager::Stager;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Subdirectory of the destination holding crash records.
pub const CRASH_DIR_NAME: &str = "crashes";

/// Default name of the staged input file.
pub const DEFAULT_STAGED_NAME: &str = ".cur_input";

/// The destination directory layout:
/// `<dest>/<file name>` is the staged input and `<dest>/crashes/` the archive.
#[derive(Debug, Clone)]
pub struct Workdir {
    root: PathBuf,
    staged_path: PathBuf,
    crash_dir: PathBuf,
}

impl Workdir {
    /// Validates and creates the destination, then proves the staged path is
    /// writable by staging a placeholder body.
    pub fn prepare(root: &Path, staged_name: &str) -> Result<Self, FunnelError> {
        if root.as_os_str().is_empty() {
            return Err(FunnelError::config("a destination directory is required"));
        }
        if matches!(staged_name, "" | "." | ".." | CRASH_DIR_NAME)
            || staged_name.contains(['/', '\\'])
        {
            return Err(FunnelError::config(format!(
                "invalid staged file name {staged_name:?}"
            )));
        }
        if let Ok(meta) = fs::metadata(root) {
            if !meta.is_dir() {
                return Err(FunnelError::config(format!(
                    "destination {} is not a directory",
                    root.display()
                )));
            }
        }

        let workdir = Self {
            root: root.to_path_buf(),
            staged_path: root.join(staged_name),
            crash_dir: root.join(CRASH_DIR_NAME),
        };
        create_private_dir(&workdir.crash_dir).map_err(|e| {
            FunnelError::io(
                format!("failed to create {}", workdir.crash_dir.display()),
                e,
            )
        })?;
        workdir.stager().stage(b"test")?;
        info!(dest = %root.display(), "dest dir looks ok");
        Ok(workdir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged_path
    }

    pub fn crash_dir(&self) -> &Path {
        &self.crash_dir
    }

    pub fn stager(&self) -> Stager {
        Stager::new(self.staged_path.clone())
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn creates_missing_destination_with_crash_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("work");

        let workdir = Workdir::prepare(&dest, DEFAULT_STAGED_NAME).unwrap();

        assert!(workdir.crash_dir().is_dir());
        assert_eq!(workdir.staged_path(), dest.join(".cur_input"));
        assert_eq!(fs::read(workdir.staged_path()).unwrap(), b"test");
    }

    #[test]
    fn existing_destination_still_gets_a_crash_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = Workdir::prepare(tmp.path(), "input.bin").unwrap();
        assert!(tmp.path().join("crashes").is_dir());
        assert_eq!(workdir.root(), tmp.path());
    }

    #[test]
    fn destination_that_is_a_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();
        let err = Workdir::prepare(&file, DEFAULT_STAGED_NAME).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
    }

    #[test]
    fn empty_destination_and_bad_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        for (root, name) in [
            (Path::new(""), DEFAULT_STAGED_NAME),
            (tmp.path(), ""),
            (tmp.path(), "../escape"),
            (tmp.path(), "."),
            (tmp.path(), ".."),
            (tmp.path(), CRASH_DIR_NAME),
        ] {
            let err = Workdir::prepare(root, name).unwrap_err();
            assert_eq!(err.kind(), FailureKind::Configuration, "{root:?} {name:?}");
        }
    }
}
