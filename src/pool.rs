//! Fork-and-track worker pool owned by the detached supervisor.
use std::{collections::HashMap, num::NonZeroUsize};

use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, fork},
};
use tracing::{debug, error, info, warn};

/// Where control ends up after the fork loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// Still the supervisor; every successful fork is tracked.
    Supervisor,
    /// Inside a freshly forked worker with this index. The caller must run the
    /// handler and never come back to the pool.
    Worker(usize),
}

/// A child that the pool stopped tracking after reaping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapedWorker {
    /// Pid of the exited worker.
    pub pid: Pid,
    /// Index the worker was started with.
    pub index: usize,
    /// How the worker ended.
    pub status: WaitStatus,
}

/// Tracks forked workers by pid.
///
/// Workers are never respawned: the pool only shrinks once forking is done.
#[derive(Debug)]
pub struct WorkerPool {
    desired: NonZeroUsize,
    tracked: HashMap<Pid, usize>,
}

impl WorkerPool {
    /// Creates an empty pool that will fork `desired` workers.
    pub fn new(desired: NonZeroUsize) -> Self {
        Self {
            desired,
            tracked: HashMap::with_capacity(desired.get()),
        }
    }

    /// Number of workers the pool was asked to run.
    pub fn desired(&self) -> usize {
        self.desired.get()
    }

    /// Number of workers currently tracked as alive.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Whether every worker has been reaped (or never started).
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Index of the worker running under `pid`, if tracked.
    pub fn index_of(&self, pid: Pid) -> Option<usize> {
        self.tracked.get(&pid).copied()
    }

    /// Pids of the tracked workers, in no particular order.
    pub fn pids(&self) -> Vec<Pid> {
        self.tracked.keys().copied().collect()
    }

    /// Forks the workers with the real `fork(2)`.
    pub fn spawn(&mut self) -> SpawnOutcome {
        // SAFETY: the supervisor is single-threaded; the child only runs the handler.
        self.spawn_with(|_| unsafe { fork() })
    }

    /// Forks workers `1..=desired` in order using `fork`.
    ///
    /// A failed fork is logged and skipped. In the child branch the loop stops
    /// immediately and [`SpawnOutcome::Worker`] is returned.
    pub fn spawn_with<F>(&mut self, mut fork: F) -> SpawnOutcome
    where
        F: FnMut(usize) -> nix::Result<ForkResult>,
    {
        for index in 1..=self.desired.get() {
            match fork(index) {
                Ok(ForkResult::Parent { child }) => {
                    debug!("Forked worker #{index} as pid {child}");
                    self.tracked.insert(child, index);
                }
                Ok(ForkResult::Child) => {
                    // Siblings belong to the supervisor, not to this worker.
                    self.tracked.clear();
                    return SpawnOutcome::Worker(index);
                }
                Err(err) => {
                    error!("fork() process #{index} failed: {err}");
                }
            }
        }

        info!(
            "Spawned {} of {} workers",
            self.tracked.len(),
            self.desired.get()
        );
        SpawnOutcome::Supervisor
    }

    /// Reaps every exited child without blocking.
    pub fn reap(&mut self) -> Vec<ReapedWorker> {
        self.reap_with(|| waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)))
    }

    /// Drains `wait` until it reports no more exited children.
    pub fn reap_with<W>(&mut self, mut wait: W) -> Vec<ReapedWorker>
    where
        W: FnMut() -> nix::Result<WaitStatus>,
    {
        let mut reaped = Vec::new();

        loop {
            match wait() {
                Ok(WaitStatus::StillAlive) => break,
                Ok(
                    status @ (WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _)),
                ) => {
                    if let Some(index) = self.tracked.remove(&pid) {
                        reaped.push(ReapedWorker { pid, index, status });
                    } else {
                        debug!("Reaped untracked child {pid}: {status:?}");
                    }
                }
                Ok(status) => {
                    debug!("Ignoring child state change {status:?}");
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    if !self.tracked.is_empty() {
                        warn!(
                            "No children left to wait for; dropping {} stale entries",
                            self.tracked.len()
                        );
                        self.tracked.clear();
                    }
                    break;
                }
                Err(err) => {
                    warn!("waitpid failed: {err}");
                    break;
                }
            }
        }

        reaped
    }

    /// Sends SIGKILL to every tracked worker.
    pub fn kill_all(&mut self) -> usize {
        self.kill_all_with(|pid| kill(pid, Signal::SIGKILL))
    }

    /// Delivers a kill through `kill` to every tracked worker and forgets them.
    ///
    /// Returns how many workers were signalled. Workers that already exited are
    /// not counted.
    pub fn kill_all_with<K>(&mut self, mut kill: K) -> usize
    where
        K: FnMut(Pid) -> nix::Result<()>,
    {
        let mut killed = 0;
        for (pid, index) in self.tracked.drain() {
            match kill(pid) {
                Ok(()) => {
                    debug!("Killed worker #{index} (pid {pid})");
                    killed += 1;
                }
                Err(Errno::ESRCH) => debug!("Worker #{index} (pid {pid}) already gone"),
                Err(err) => error!("Failed to kill worker #{index} (pid {pid}): {err}"),
            }
        }
        killed
    }
}
