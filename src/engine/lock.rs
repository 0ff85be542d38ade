// ── Data-directory lock file ───────────────────────────────────────────────
//
// One engine instance per data directory. The lock file is created with
// create-new semantics and holds the owner's pid; it is removed when the
// engine closes or the guard drops.

use std::io::Write;
use std::path::PathBuf;

use log::warn;

use crate::atoms::error::{MemoryError, MemoryResult};

#[derive(Debug)]
pub(crate) struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Acquire the lock, failing with `LockError` when another instance
    /// already holds the directory.
    pub fn acquire(path: PathBuf) -> MemoryResult<Self> {
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(LockFile { path, released: false })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                Err(MemoryError::Lock(format!(
                    "{} (held by pid {})",
                    path.display(),
                    holder.trim()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("[engine] could not remove lock file {}: {e}", self.path.display());
        }
        self.released = true;
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.lock");

        let mut first = LockFile::acquire(path.clone()).unwrap();
        let err = LockFile::acquire(path.clone()).unwrap_err();
        assert!(matches!(err, MemoryError::Lock(_)));

        first.release();
        let _second = LockFile::acquire(path).unwrap();
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.lock");
        {
            let _guard = LockFile::acquire(path.clone()).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
