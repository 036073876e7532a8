//! Streams directory resolution.
//!
//! The directory holding `<stream>.events` and `<stream>.rules` files is
//! resolved from an explicit configuration override, the `LIBNETCONF_STREAMS`
//! environment variable, or the compiled default, in that order. The
//! directory is created world-writable when missing so that any server
//! process on the host can publish into it.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::config::{EngineConfig, DEFAULT_STREAMS_PATH, STREAMS_PATH_ENV};

/// Errors from resolving the streams directory.
#[derive(Debug, thiserror::Error)]
pub enum DirError {
    /// The path exists but is not a directory.
    #[error("streams path {0} exists but is not a directory")]
    NotADirectory(PathBuf),

    /// The directory exists but cannot be read.
    #[error("streams directory {path} is not accessible: {source}")]
    Inaccessible {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Creating a missing directory failed.
    #[error("creating streams directory {path} failed: {source}")]
    Create {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

/// Resolves, and if necessary creates, the streams directory.
///
/// An explicit `streams_dir` in the configuration is authoritative and its
/// failure is an error. The environment override falls back to the compiled
/// default when the environment path is unusable.
///
/// # Errors
///
/// Returns [`DirError`] when the resolved path is not a usable directory.
pub fn resolve(config: &EngineConfig) -> Result<PathBuf, DirError> {
    if let Some(dir) = &config.streams_dir {
        return prepare(dir.clone());
    }

    if let Ok(env) = std::env::var(STREAMS_PATH_ENV) {
        if !env.is_empty() {
            tracing::debug!("checking streams path {env} from {STREAMS_PATH_ENV}");
            match prepare(PathBuf::from(&env)) {
                Ok(path) => return Ok(path),
                Err(e) => {
                    tracing::warn!("streams path from {STREAMS_PATH_ENV} is unusable: {e}");
                }
            }
        }
    }

    prepare(PathBuf::from(DEFAULT_STREAMS_PATH))
}

fn prepare(path: PathBuf) -> Result<PathBuf, DirError> {
    match fs::metadata(&path) {
        Ok(meta) => {
            if !meta.is_dir() {
                return Err(DirError::NotADirectory(path));
            }
            // Probe readability; write failures surface on first use.
            if let Err(source) = fs::read_dir(&path) {
                return Err(DirError::Inaccessible { path, source });
            }
            Ok(path)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(&path).map_err(|source| DirError::Create {
                path: path.clone(),
                source,
            })?;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o777));
            Ok(path)
        }
        Err(source) => Err(DirError::Inaccessible { path, source }),
    }
}
