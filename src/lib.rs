//! Forkpool is a minimal process-pool daemon supervisor for Unix-like systems. An
//! embedding program registers a worker handler and a worker count, and forkpool
//! detaches from the terminal, forks the workers and keeps track of them. A PID
//! file marks the daemon as running; removing it is how `stop` shuts it down.
//!
//! ```no_run
//! use forkpool::supervisor::Supervisor;
//!
//! let mut supervisor = Supervisor::new();
//! supervisor.set_handler(|index| loop {
//!     println!("this is #{index}");
//!     std::thread::sleep(std::time::Duration::from_secs(3));
//! });
//! supervisor.set_worker_count(4).unwrap();
//! supervisor.run(std::env::args_os()).unwrap();
//! ```

/// CLI interface.
pub mod cli;

/// Registration settings.
pub mod config;

/// Fixed timings and defaults.
pub mod constants;

/// Daemonization helpers.
pub mod daemon;

/// Error handling.
pub mod error;

/// PID file management.
pub mod pid_file;

/// Worker pool bookkeeping.
pub mod pool;

/// Lifecycle state machine.
pub mod supervisor;
