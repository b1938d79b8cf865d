//! Lifecycle state machine for the worker pool daemon.
//!
//! `start` claims the PID file, detaches, forks the workers and then watches
//! them until the PID file disappears or the pool drains. `stop` only removes
//! the PID file: the detached supervisor notices on its next poll and kills
//! the workers itself, so `stop` can report success before the daemon is gone.
use std::{
    ffi::OsString,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    process, thread,
};

use nix::{
    errno::Errno,
    sys::{signal, wait::WaitStatus},
    unistd::{Pid, getpid},
};
use strum::{AsRefStr, Display};
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::{
    cli::{self, Cli, Commands},
    config::{SupervisorConfig, WorkerHandler, program_name},
    constants::{
        POLL_INTERVAL, RESTART_DELAY, STATUS_SEPARATOR, STOP_GRACE_PERIOD,
        WORKER_PANICKED_STATUS, WORKER_RETURNED_STATUS,
    },
    daemon::{ChildExitSignal, Daemonized, daemonize},
    error::{PidFileError, SupervisorError},
    pid_file::PidFile,
    pool::{ReapedWorker, SpawnOutcome, WorkerPool},
};

/// What the current process believes about the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DaemonState {
    /// No PID file.
    NotRunning,
    /// PID file claimed, detaching fork in progress.
    Daemonizing,
    /// PID file holds a supervisor pid.
    Running,
    /// PID file removed, supervisor not yet gone.
    Stopping,
}

/// Why a detached supervisor left its monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ShutdownReason {
    /// The PID file was removed; every tracked worker was killed.
    PidFileRemoved,
    /// Every worker exited on its own; the supervisor released its PID file.
    PoolDrained,
}

/// Snapshot produced by the `status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// State implied by the PID file.
    pub state: DaemonState,
    /// Pid claimed by the PID file, if any.
    pub pid: Option<Pid>,
    /// Whether the claimed pid belongs to a live process.
    pub alive: bool,
    /// Live children of the claimed pid.
    pub workers: usize,
}

/// Result of a dispatched command, as seen by the process that returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Launcher side of `start`: the supervisor was forked off.
    Detached {
        /// Pid of the detached supervisor.
        supervisor: Pid,
    },
    /// `start` found a PID file and did nothing.
    AlreadyRunning {
        /// Contents of the existing PID file.
        claimed: String,
    },
    /// `stop` removed the PID file.
    Stopping {
        /// Contents of the removed PID file.
        claimed: String,
    },
    /// `stop` found no PID file.
    NotRunning,
    /// Result of `status`.
    Status(StatusReport),
    /// Supervisor side of `start`, after the monitor loop ended.
    Shutdown(ShutdownReason),
    /// No recognised command; usage was printed.
    Usage,
}

/// Process-pool supervisor driven through `start`, `stop` and `restart`.
pub struct Supervisor {
    config: SupervisorConfig,
    handler: Option<WorkerHandler>,
    state: DaemonState,
    own_pid: Option<Pid>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Creates a supervisor with the default configuration and no handler.
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    /// Creates a supervisor from explicit settings.
    pub fn with_config(config: SupervisorConfig) -> Self {
        Self {
            config,
            handler: None,
            state: DaemonState::NotRunning,
            own_pid: None,
        }
    }

    /// Current settings.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Last known daemon state.
    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Pid of this process if it is the detached supervisor.
    pub fn own_pid(&self) -> Option<Pid> {
        self.own_pid
    }

    /// Sets the program name used in operator messages.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.config.name = name.into();
    }

    /// Sets the PID file location.
    pub fn set_pid_file(&mut self, path: impl Into<PathBuf>) {
        self.config.pid_file = path.into();
    }

    /// Registers the function every worker runs.
    pub fn set_handler<F>(&mut self, handler: F)
    where
        F: Fn(usize) + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Sets how many workers `start` forks.
    pub fn set_worker_count(&mut self, count: usize) -> Result<(), SupervisorError> {
        self.config.set_workers(count)
    }

    /// Redirects the detached supervisor's stdio to `/dev/null` when enabled.
    pub fn set_detach_stdio(&mut self, detach: bool) {
        self.config.detach_stdio = detach;
    }

    /// Parses `argv` and runs the requested command.
    ///
    /// Unknown or missing commands print usage and succeed.
    pub fn run<I, T>(&mut self, argv: I) -> Result<Outcome, SupervisorError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
        if let Some(name) = argv.first().and_then(program_name) {
            self.set_name(name);
        }

        match cli::parse_args(&argv) {
            Ok(cli) => self.dispatch(cli),
            Err(err) => Ok(self.reject(&err)),
        }
    }

    /// Runs an already-parsed command line.
    pub fn dispatch(&mut self, cli: Cli) -> Result<Outcome, SupervisorError> {
        self.apply_overrides(&cli)?;

        match cli.command {
            Some(Commands::Start) => self.start(),
            Some(Commands::Stop) => self.stop(),
            Some(Commands::Restart) => self.restart(),
            Some(Commands::Status) => self.status(),
            None => Ok(self.usage()),
        }
    }

    /// Handles a command line clap refused.
    pub fn reject(&self, err: &clap::Error) -> Outcome {
        if cli::is_informational(err) {
            let _ = err.print();
            return Outcome::Usage;
        }

        debug!("Unrecognised command line: {err}");
        self.usage()
    }

    /// Prints usage text.
    pub fn usage(&self) -> Outcome {
        println!("{}", cli::usage());
        Outcome::Usage
    }

    fn apply_overrides(&mut self, cli: &Cli) -> Result<(), SupervisorError> {
        if let Some(path) = &cli.pid_file {
            self.set_pid_file(path);
        }
        if let Some(count) = cli.workers
            && matches!(cli.command, Some(Commands::Start | Commands::Restart))
        {
            self.set_worker_count(count)?;
        }
        if cli.detach_stdio {
            self.set_detach_stdio(true);
        }
        Ok(())
    }

    fn pid_file(&self) -> PidFile {
        PidFile::new(&self.config.pid_file)
    }

    fn transition(&mut self, next: DaemonState) {
        if self.state != next {
            debug!("{} state {} -> {}", self.config.name, self.state, next);
            self.state = next;
        }
    }

    /// Detaches and runs the worker pool.
    ///
    /// Returns [`Outcome::Detached`] in the invoking process and
    /// [`Outcome::Shutdown`] in the detached supervisor once it stops. Worker
    /// processes never return from this call.
    pub fn start(&mut self) -> Result<Outcome, SupervisorError> {
        let pid_file = self.pid_file();
        match pid_file.claim() {
            Ok(()) => {}
            Err(PidFileError::AlreadyExists { contents, .. }) => {
                info!("{} is running ({contents})", self.config.name);
                self.transition(DaemonState::Running);
                return Ok(Outcome::AlreadyRunning { claimed: contents });
            }
            Err(err) => return Err(err.into()),
        }

        if self.handler.is_none() {
            release_claim(&pid_file);
            error!("process handler unregistered.");
            return Err(SupervisorError::MissingHandler);
        }

        self.transition(DaemonState::Daemonizing);
        let pid = match daemonize(&pid_file, self.config.detach_stdio) {
            Ok(Daemonized::Launcher { supervisor }) => {
                info!("starting {} {STATUS_SEPARATOR} success", self.config.name);
                self.transition(DaemonState::Running);
                return Ok(Outcome::Detached { supervisor });
            }
            Ok(Daemonized::Supervisor { pid }) => pid,
            Err(err) => {
                release_claim(&pid_file);
                self.transition(DaemonState::NotRunning);
                error!("create main process {STATUS_SEPARATOR} failed: {err}");
                return Err(err);
            }
        };

        self.own_pid = Some(pid);
        self.transition(DaemonState::Running);

        let sigchld = match ChildExitSignal::block() {
            Ok(sigchld) => sigchld,
            Err(err) => {
                release_claim(&pid_file);
                self.transition(DaemonState::NotRunning);
                return Err(err.into());
            }
        };

        let mut pool = WorkerPool::new(self.config.workers);
        info!("Supervisor {pid} forking {} workers", pool.desired());
        if let SpawnOutcome::Worker(index) = pool.spawn() {
            run_worker(self.handler.as_deref(), index, &sigchld);
        }

        let reason = self.monitor(&pid_file, &mut pool, &sigchld, pid);
        self.transition(DaemonState::NotRunning);
        info!("Supervisor {pid} exiting: {reason}");
        Ok(Outcome::Shutdown(reason))
    }

    /// Watches the pool until the PID file stops naming `own_pid` or no worker is left.
    fn monitor(
        &mut self,
        pid_file: &PidFile,
        pool: &mut WorkerPool,
        sigchld: &ChildExitSignal,
        own_pid: Pid,
    ) -> ShutdownReason {
        loop {
            for worker in pool.reap() {
                log_reaped(&worker);
            }

            if !pid_file.is_owned_by(own_pid) {
                self.transition(DaemonState::Stopping);
                let killed = pool.kill_all();
                info!(
                    "PID file {:?} removed or taken over; killed {killed} workers",
                    pid_file.path()
                );
                return ShutdownReason::PidFileRemoved;
            }

            if pool.is_empty() {
                warn!("All {} workers have exited; releasing PID file", pool.desired());
                match pid_file.remove_if_owned(own_pid) {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "PID file {:?} no longer names supervisor {own_pid}; leaving it",
                        pid_file.path()
                    ),
                    Err(err) => error!("{err}"),
                }
                return ShutdownReason::PoolDrained;
            }

            sigchld.wait(POLL_INTERVAL);
        }
    }

    /// Removes the PID file so the running supervisor shuts itself down.
    ///
    /// No process is signalled from here. The method waits one grace period and
    /// reports success, which may come before the supervisor has observed the
    /// removal and killed its workers.
    pub fn stop(&mut self) -> Result<Outcome, SupervisorError> {
        let pid_file = self.pid_file();
        if !pid_file.exists() {
            info!("{} is not running.", self.config.name);
            self.transition(DaemonState::NotRunning);
            return Ok(Outcome::NotRunning);
        }

        let claimed = pid_file.read().unwrap_or_else(|err| {
            warn!("{err}");
            String::new()
        });

        self.transition(DaemonState::Stopping);
        if let Err(err) = pid_file.remove() {
            error!(
                "remove pid file: {:?} {STATUS_SEPARATOR} failed: {err}",
                pid_file.path()
            );
        }

        thread::sleep(STOP_GRACE_PERIOD);
        info!(
            "stopping {} ({claimed}) {STATUS_SEPARATOR} success",
            self.config.name
        );
        self.transition(DaemonState::NotRunning);
        Ok(Outcome::Stopping { claimed })
    }

    /// Stops, waits a moment, then starts again. Not atomic.
    pub fn restart(&mut self) -> Result<Outcome, SupervisorError> {
        self.stop()?;
        thread::sleep(RESTART_DELAY);
        self.start()
    }

    /// Reports what the PID file claims and whether that process is alive.
    pub fn status(&mut self) -> Result<Outcome, SupervisorError> {
        let pid_file = self.pid_file();
        let name = self.config.name.clone();

        let report = match pid_file.read_pid() {
            Ok(None) => {
                info!("{name} is not running.");
                StatusReport {
                    state: DaemonState::NotRunning,
                    pid: None,
                    alive: false,
                    workers: 0,
                }
            }
            Ok(Some(pid)) => {
                let alive = is_alive(pid);
                let workers = if alive { count_workers(pid) } else { 0 };
                if alive {
                    info!("{name} is running ({pid}) with {workers} workers");
                } else {
                    warn!("{name} PID file is stale: process {pid} is not alive");
                }
                StatusReport {
                    state: DaemonState::Running,
                    pid: Some(pid),
                    alive,
                    workers,
                }
            }
            Err(PidFileError::Parse(raw)) if raw.is_empty() => {
                info!("{name} is starting");
                StatusReport {
                    state: DaemonState::Daemonizing,
                    pid: None,
                    alive: false,
                    workers: 0,
                }
            }
            Err(err) => return Err(err.into()),
        };

        self.transition(report.state);
        Ok(Outcome::Status(report))
    }
}

/// Runs the handler inside a forked worker and exits the process.
fn run_worker(
    handler: Option<&dyn Fn(usize)>,
    index: usize,
    sigchld: &ChildExitSignal,
) -> ! {
    if let Err(err) = sigchld.release() {
        warn!("Worker #{index} could not restore SIGCHLD delivery: {err}");
    }
    debug!("Worker #{index} running as pid {}", getpid());

    let status = match handler {
        Some(handler) => match panic::catch_unwind(AssertUnwindSafe(|| handler(index))) {
            Ok(()) => {
                warn!("Worker #{index} handler returned; exiting");
                WORKER_RETURNED_STATUS
            }
            Err(_) => {
                error!("Worker #{index} handler panicked");
                WORKER_PANICKED_STATUS
            }
        },
        None => {
            error!("process handler unregistered.");
            WORKER_PANICKED_STATUS
        }
    };

    process::exit(status)
}

fn release_claim(pid_file: &PidFile) {
    if let Err(err) = pid_file.remove() {
        debug!("Could not release PID file claim: {err}");
    }
}

fn log_reaped(worker: &ReapedWorker) {
    match worker.status {
        WaitStatus::Exited(_, code) => warn!(
            "Worker #{} (pid {}) exited with status {code}",
            worker.index, worker.pid
        ),
        WaitStatus::Signaled(_, sig, _) => warn!(
            "Worker #{} (pid {}) was terminated by {sig}",
            worker.index, worker.pid
        ),
        status => debug!("Worker #{} changed state: {status:?}", worker.index),
    }
}

fn is_alive(pid: Pid) -> bool {
    match signal::kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Counts live, non-zombie children of `parent`.
fn count_workers(parent: Pid) -> usize {
    let Ok(raw) = u32::try_from(parent.as_raw()) else {
        return 0;
    };
    let parent = sysinfo::Pid::from_u32(raw);

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .processes()
        .values()
        .filter(|process| process.parent() == Some(parent))
        .filter(|process| !matches!(process.status(), ProcessStatus::Zombie))
        .count()
}
