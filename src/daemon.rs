//! Daemonization and child-exit notification for the detached supervisor.
use std::{
    fs::File,
    os::unix::io::{AsRawFd, RawFd},
    time::Duration,
};

use nix::{
    sys::signal::{SigSet, Signal},
    unistd::{ForkResult, Pid, fork, getpid, setsid},
};
use tracing::debug;

use crate::{constants::DEV_NULL, error::SupervisorError, pid_file::PidFile};

/// Which side of the daemonizing fork the caller ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daemonized {
    /// The invoking process. It should report and get out of the way.
    Launcher {
        /// Pid of the detached supervisor it forked.
        supervisor: Pid,
    },
    /// The detached supervisor, now a session leader with its pid recorded.
    Supervisor {
        /// Own pid, as written into the PID file.
        pid: Pid,
    },
}

/// Forks once and turns the child into a detached session leader.
///
/// `pid_file` must already be claimed; the child records its pid there. The
/// caller is responsible for releasing the claim when this returns an error.
pub fn daemonize(
    pid_file: &PidFile,
    detach_stdio: bool,
) -> Result<Daemonized, SupervisorError> {
    // SAFETY: the supervisor is single-threaded at this point.
    match unsafe { fork() }.map_err(SupervisorError::Daemonize)? {
        ForkResult::Parent { child } => Ok(Daemonized::Launcher { supervisor: child }),
        ForkResult::Child => {
            setsid().map_err(SupervisorError::Session)?;
            let pid = getpid();
            pid_file.record(pid)?;
            debug!("Recorded supervisor pid {pid} in {:?}", pid_file.path());

            if detach_stdio {
                redirect_stdio()?;
            }

            Ok(Daemonized::Supervisor { pid })
        }
    }
}

/// Points stdin, stdout and stderr at `/dev/null`.
fn redirect_stdio() -> std::io::Result<()> {
    let devnull = File::options().read(true).write(true).open(DEV_NULL)?;
    redirect_fds(
        &devnull,
        &[libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO],
    )
}

/// Duplicates `source` onto every descriptor in `targets`, stopping at the first failure.
fn redirect_fds(source: &File, targets: &[RawFd]) -> std::io::Result<()> {
    for &target in targets {
        if unsafe { libc::dup2(source.as_raw_fd(), target) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(())
}

/// SIGCHLD held pending so the monitor loop can sleep until a worker exits.
#[derive(Debug)]
pub struct ChildExitSignal {
    mask: SigSet,
}

impl ChildExitSignal {
    /// Blocks SIGCHLD for the calling thread.
    ///
    /// Forked workers inherit the mask and must call [`ChildExitSignal::release`].
    pub fn block() -> nix::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.thread_block()?;
        Ok(Self { mask })
    }

    /// Restores normal SIGCHLD delivery.
    pub fn release(&self) -> nix::Result<()> {
        self.mask.thread_unblock()
    }

    /// Waits until a child changes state or `timeout` elapses.
    ///
    /// Returns `true` when SIGCHLD was consumed.
    #[cfg(target_os = "linux")]
    pub fn wait(&self, timeout: Duration) -> bool {
        let timeout = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        let set: &libc::sigset_t = self.mask.as_ref();
        let signal = unsafe { libc::sigtimedwait(set, std::ptr::null_mut(), &timeout) };
        signal == libc::SIGCHLD
    }

    /// Waits until `timeout` elapses; this target has no timed signal wait.
    #[cfg(not(target_os = "linux"))]
    pub fn wait(&self, timeout: Duration) -> bool {
        std::thread::sleep(timeout);
        false
    }
}
