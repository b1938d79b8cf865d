//! Error handling for forkpool.
use std::{io, path::PathBuf};

use thiserror::Error;

/// Defines all possible errors raised while supervising the worker pool.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start` was invoked before a worker handler was registered.
    #[error("process handler unregistered")]
    MissingHandler,

    /// A worker count of zero was requested.
    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    /// The fork that detaches the supervisor from the terminal failed.
    #[error("Failed to create main process: {0}")]
    Daemonize(#[source] nix::errno::Errno),

    /// The detached process could not become a session leader.
    #[error("Failed to create new session: {0}")]
    Session(#[source] nix::errno::Errno),

    /// Error for PID file.
    #[error("PID file error: {0}")]
    PidFile(#[from] PidFileError),

    /// Error redirecting or accessing standard streams.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error returned by a raw system call.
    #[error("System call failed: {0}")]
    ErrNo(#[from] nix::errno::Errno),
}

/// Error type for PID file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// The PID file is already present, so another supervisor claims to be running.
    #[error("PID file {path:?} already exists ({contents})")]
    AlreadyExists {
        /// Location of the existing file.
        path: PathBuf,
        /// Whatever the existing file holds, usually the claimed pid.
        contents: String,
    },

    /// Error creating the PID file.
    #[error("Failed to create PID file {path:?}: {source}")]
    Claim {
        /// Location of the file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error writing the supervisor pid into a claimed PID file.
    #[error("Failed to write PID file {path:?}: {source}")]
    Record {
        /// Location of the file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error reading the PID file.
    #[error("Failed to read PID file {path:?}: {source}")]
    Read {
        /// Location of the file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error removing the PID file.
    #[error("Failed to remove PID file {path:?}: {source}")]
    Remove {
        /// Location of the file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The PID file does not hold a decimal process id.
    #[error("PID file holds '{0}', not a process id")]
    Parse(String),
}
