//! Runs a real supervisor built from the library with a custom handler.
//!
//! The target has no libtest harness: the same executable re-runs itself as the
//! daemon, so forked workers never share a process with other tests.

#[path = "common/mod.rs"]
mod common;

use std::{
    env,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use common::{DaemonGuard, wait_for_process_exit, wait_for_supervisor_pid, worker_pids};
use forkpool::supervisor::{Outcome, Supervisor};
use sysinfo::{ProcessesToUpdate, System};
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

const ROLE_VAR: &str = "FORKPOOL_WORKER_HANDLER_DIR";
const WORKERS: usize = 3;
const PANICKING_INDEX: usize = 2;

fn main() {
    match env::var_os(ROLE_VAR) {
        Some(dir) => run_daemon(PathBuf::from(dir)),
        None => {
            each_index_runs_once_and_a_panicking_worker_is_reaped();
            println!("worker_handler: ok");
        }
    }
}

fn run_daemon(dir: PathBuf) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .with_ansi(false)
        .try_init();

    let indices = dir.join("indices");
    let mut supervisor = Supervisor::new();
    supervisor.set_pid_file(dir.join("daemon.pid"));
    supervisor
        .set_worker_count(WORKERS)
        .expect("worker count is valid");
    supervisor.set_handler(move |index| {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&indices)
            .expect("failed to open index log");
        writeln!(log, "{index}").expect("failed to record index");
        drop(log);

        if index == PANICKING_INDEX {
            panic!("worker #{index} gives up");
        }
        loop {
            thread::sleep(Duration::from_secs(1));
        }
    });

    match supervisor.run(["pool", "start"]) {
        Ok(Outcome::Detached { .. } | Outcome::Shutdown(_)) => {}
        other => panic!("unexpected start outcome: {other:?}"),
    }
}

fn each_index_runs_once_and_a_panicking_worker_is_reaped() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");
    let output = temp.path().join("supervisor.log");
    let _guard = DaemonGuard::new(&pid_file);

    let status = Command::new(env::current_exe().expect("no current exe"))
        .env(ROLE_VAR, temp.path())
        .stdin(Stdio::null())
        .stdout(File::create(&output).expect("failed to create log"))
        .stderr(Stdio::null())
        .status()
        .expect("failed to launch daemon");
    assert!(status.success(), "launcher exited with {status}");

    let supervisor = wait_for_supervisor_pid(&pid_file);

    let indices = temp.path().join("indices");
    wait_until("every index to be handled", || {
        recorded_indices(&indices).len() == WORKERS
    });
    // Nothing is respawned, so the set stays the same.
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(recorded_indices(&indices), vec![1, 2, 3]);

    // Reaped children disappear entirely rather than lingering as zombies.
    wait_until("the panicked worker to be reaped", || {
        children_of(supervisor) == WORKERS - 1
    });
    let survivors = worker_pids(supervisor);
    assert_eq!(survivors.len(), WORKERS - 1);

    wait_until("the exit status to be logged", || {
        fs::read_to_string(&output).is_ok_and(|log| {
            log.lines().any(|line| {
                line.contains(&format!("Worker #{PANICKING_INDEX} "))
                    && line.contains("exited with status 1")
            })
        })
    });

    fs::remove_file(&pid_file).expect("failed to remove pid file");
    for worker in survivors {
        wait_for_process_exit(worker);
    }
    wait_for_process_exit(supervisor);
}

fn recorded_indices(path: &Path) -> Vec<usize> {
    let mut indices: Vec<usize> = fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    indices.sort_unstable();
    indices
}

/// Children of `parent` in any state, zombies included.
fn children_of(parent: u32) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let parent = sysinfo::Pid::from_u32(parent);
    system
        .processes()
        .values()
        .filter(|process| process.parent() == Some(parent))
        .count()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(100));
    }
}
