//! Error types for pinforge-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::sandbox::SandboxError;

/// Errors raised by the core domain layer.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Filesystem operation failed on a specific path
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No platform tag is known for this host
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The per-platform package root does not exist
    #[error("Package root not found at {0}")]
    PackageRootMissing(PathBuf),

    /// Sandbox layer error
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
