//! Error types for pinforge-ci.

use std::path::PathBuf;

use pinforge_core::{CoreError, SandboxError};
use thiserror::Error;

/// Errors from launching or streaming a single subprocess.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Step has no program to run
    #[error("Step {0} has empty command")]
    EmptyCommand(String),

    /// Program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O while waiting on the child
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configured timeout elapsed; the child was killed
    #[error("Step {step} timed out after {timeout_secs} seconds")]
    TimedOut { step: String, timeout_secs: u64 },
}

/// Environment errors that stop a run before any package is processed.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Base runtime interpreter missing
    #[error("Runtime executable not found at {0}")]
    RuntimeNotFound(PathBuf),

    /// Output directory could not be created
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Core layer error (platform detection, package discovery)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Pristine snapshot failed
    #[error(transparent)]
    Sandbox(SandboxError),
}

impl From<SandboxError> for PipelineError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::RuntimeNotFound(path) => PipelineError::RuntimeNotFound(path),
            other => PipelineError::Sandbox(other),
        }
    }
}

/// Invalid configuration input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid environment assignment {0:?}, expected KEY=VALUE")]
    InvalidAssignment(String),
}
