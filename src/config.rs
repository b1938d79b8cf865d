//! Registration settings for the worker pool.
use std::{
    env,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use crate::{
    constants::{DEFAULT_WORKER_COUNT, PID_FILE_NAME},
    error::SupervisorError,
};

/// Function run by every worker, called with its 1-based index.
///
/// The handler is expected to loop forever. A worker whose handler returns
/// exits instead of going back to the fork loop.
pub type WorkerHandler = Box<dyn Fn(usize)>;

/// Settings the embedding program registers before calling `run`.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Program name used in operator messages.
    pub name: String,
    /// Location of the PID file.
    pub pid_file: PathBuf,
    /// Number of workers forked by `start`.
    pub workers: NonZeroUsize,
    /// Redirect the supervisor's stdio to `/dev/null` after detaching.
    pub detach_stdio: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: default_program_name(),
            pid_file: default_pid_file(),
            workers: DEFAULT_WORKER_COUNT,
            detach_stdio: false,
        }
    }
}

impl SupervisorConfig {
    /// Validates and stores a worker count.
    pub fn set_workers(&mut self, count: usize) -> Result<(), SupervisorError> {
        self.workers =
            NonZeroUsize::new(count).ok_or(SupervisorError::InvalidWorkerCount(count))?;
        Ok(())
    }
}

/// Returns `daemon.pid` inside the directory of the running executable.
///
/// Falls back to the current directory when the executable path is unknown.
pub fn default_pid_file() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PID_FILE_NAME)
}

/// Derives the program name from an `argv[0]`-style path.
pub fn program_name(argv0: impl AsRef<Path>) -> Option<String> {
    argv0
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn default_program_name() -> String {
    env::current_exe()
        .ok()
        .and_then(program_name)
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
