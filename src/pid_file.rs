//! PID file used as the single-instance flag and external stop signal.
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use nix::unistd::Pid;

use crate::error::PidFileError;

/// Represents the supervisor PID file.
///
/// The file exists exactly while a detached supervisor is alive. Removing it from
/// outside is how `stop` asks the supervisor to shut down.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Creates a handle for the PID file at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the PID file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the file is present.
    ///
    /// Every call stats the file again; nothing is cached between calls.
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }

    /// Atomically creates an empty PID file.
    ///
    /// Fails with [`PidFileError::AlreadyExists`] when another invocation already
    /// holds the file, so the existence check and the creation cannot race.
    pub fn claim(&self) -> Result<(), PidFileError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| PidFileError::Claim {
                path: self.path.clone(),
                source,
            })?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(PidFileError::AlreadyExists {
                    path: self.path.clone(),
                    contents: self.read().unwrap_or_default(),
                })
            }
            Err(source) => Err(PidFileError::Claim {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Writes `pid` into a file previously created by [`PidFile::claim`].
    ///
    /// The file is never re-created: if it disappeared since the claim, the stop
    /// request wins and this returns an error.
    pub fn record(&self, pid: Pid) -> Result<(), PidFileError> {
        let record_err = |source| PidFileError::Record {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(record_err)?;
        file.write_all(pid.to_string().as_bytes())
            .map_err(record_err)?;
        file.flush().map_err(record_err)
    }

    /// Reads the raw, trimmed contents of the file.
    pub fn read(&self) -> Result<String, PidFileError> {
        fs::read_to_string(&self.path)
            .map(|contents| contents.trim().to_string())
            .map_err(|source| PidFileError::Read {
                path: self.path.clone(),
                source,
            })
    }

    /// Reads the claimed pid, or `None` when the file is absent.
    pub fn read_pid(&self) -> Result<Option<Pid>, PidFileError> {
        if !self.exists() {
            return Ok(None);
        }

        let contents = self.read()?;
        contents
            .parse::<libc::pid_t>()
            .map(|raw| Some(Pid::from_raw(raw)))
            .map_err(|_| PidFileError::Parse(contents))
    }

    /// Removes the file.
    pub fn remove(&self) -> Result<(), PidFileError> {
        fs::remove_file(&self.path).map_err(|source| PidFileError::Remove {
            path: self.path.clone(),
            source,
        })
    }

    /// Whether the file exists and names `owner`.
    ///
    /// An empty, unreadable or unparsable file belongs to nobody.
    pub fn is_owned_by(&self, owner: Pid) -> bool {
        matches!(self.read_pid(), Ok(Some(pid)) if pid == owner)
    }

    /// Removes the file only if it still names `owner`.
    ///
    /// Returns `true` when the file was removed.
    pub fn remove_if_owned(&self, owner: Pid) -> Result<bool, PidFileError> {
        match self.read_pid() {
            Ok(Some(pid)) if pid == owner => self.remove().map(|_| true),
            Ok(_) | Err(PidFileError::Parse(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
