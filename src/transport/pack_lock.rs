//! Ownership handle for the `.keep` file a backend leaves next to a freshly
//! transferred pack when it defers finalization to the caller.
//!
//! The file travels backend → session → caller. Whoever holds the handle last
//! must call [`PackLock::release`]; dropping it unreleased leaves the lock on
//! disk and is reported as a leak.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
#[must_use = "a pack lock must be released with `PackLock::release`"]
pub struct PackLock {
    path: PathBuf,
    released: bool,
}

impl PackLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file, letting the pack be treated like any other pack.
    /// A lock file that is already gone counts as released.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("released pack lock {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PackLock {
    fn drop(&mut self) {
        if !self.released {
            tracing::error!("pack lock {} leaked without release", self.path.display());
        }
    }
}
