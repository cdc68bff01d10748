//! Error types for process supervision

use std::io;
use thiserror::Error;

/// Process supervision errors
///
/// Only API misuse and configuration problems are reported through this type.
/// Failures of a run that is already in flight (spawn, wait) are observed
/// through [`crate::ProcessController::status`] and [`crate::Done`] instead.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Executable could not be resolved on the search path
    #[error("Executable not found: {program}: {source}")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    /// Operating system refused to start the process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Standard stream pipe could not be created or duplicated
    #[error("Pipe error: {0}")]
    Pipe(#[source] io::Error),

    /// Invalid configuration
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// Run requested while the previous run is being torn down
    #[error("Process is terminating")]
    Terminating,

    /// Status text that names none of the lifecycle states
    ///
    /// Raised by `Status::from_str`; the controller itself cannot hold an
    /// invalid status.
    #[error("Invalid process state: {0}")]
    InvalidState(String),

    /// No Tokio runtime is available to host the launch task
    #[error("No Tokio runtime available to supervise the process")]
    NoRuntime,

    /// Run requested without a bound launch configuration
    #[error("No launch configuration bound to the controller")]
    NoConfig,

    /// Process definition could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Command exited unsuccessfully
    #[error("Command failed with exit code {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    /// Caller cancelled the operation before it completed
    #[error("Operation canceled")]
    Canceled,

    /// Other I/O failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
