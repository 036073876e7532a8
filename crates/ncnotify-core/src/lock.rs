//! Scoped advisory file locking.

use std::fs::File;
use std::io;

/// An exclusive advisory whole-file lock, released on drop.
///
/// Serializes record appends and replay reads on one stream file across
/// processes. The lock is blocking; every acquisition site holds it only
/// for the duration of a single record read or write.
#[derive(Debug)]
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Acquires an exclusive lock on `file`, blocking until available.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the lock cannot be taken.
    pub fn exclusive(file: &'a File) -> io::Result<Self> {
        fs2::FileExt::lock_exclusive(file)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(self.file) {
            tracing::warn!("releasing stream file lock failed: {e}");
        }
    }
}
