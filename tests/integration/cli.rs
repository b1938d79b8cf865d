#[path = "common/mod.rs"]
mod common;

use assert_cmd::Command;
use common::forkpool;
use predicates::{boolean::PredicateBooleanExt, str::contains};
use tempfile::tempdir;

#[test]
fn missing_command_prints_usage() {
    Command::new(assert_cmd::cargo::cargo_bin!("forkpool"))
        .assert()
        .success()
        .stdout(contains("Usage").and(contains("restart")));
}

#[test]
fn unknown_command_prints_usage_without_failing() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");

    forkpool(&pid_file)
        .arg("reload")
        .assert()
        .success()
        .stdout(contains("Usage").and(contains("start")));

    assert!(!pid_file.exists());
}

#[test]
fn stop_when_not_running_is_a_noop() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");

    forkpool(&pid_file)
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("forkpool is not running."));

    assert!(!pid_file.exists());
}

#[test]
fn status_when_not_running() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");

    forkpool(&pid_file)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("is not running"));
}

#[test]
fn start_with_stale_pid_file_reports_running() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");
    std::fs::write(&pid_file, "999999").expect("failed to seed pid file");

    forkpool(&pid_file)
        .arg("start")
        .assert()
        .success()
        .stdout(contains("is running (999999)"));

    assert_eq!(
        std::fs::read_to_string(&pid_file).expect("pid file should remain"),
        "999999"
    );
}

#[test]
fn zero_workers_fail_before_claiming_pid_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");

    forkpool(&pid_file)
        .arg("--workers")
        .arg("0")
        .arg("start")
        .assert()
        .failure()
        .code(1)
        .stdout(contains("worker count must be at least 1"));

    assert!(!pid_file.exists());
}

#[test]
fn zero_workers_do_not_block_stop_or_status() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");

    forkpool(&pid_file)
        .arg("--workers")
        .arg("0")
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("forkpool is not running."));

    forkpool(&pid_file)
        .arg("--workers")
        .arg("0")
        .arg("status")
        .assert()
        .success()
        .stdout(contains("is not running"));
}

#[test]
fn invalid_log_level_prints_usage() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("daemon.pid");

    forkpool(&pid_file)
        .arg("--log-level")
        .arg("loud")
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Usage"));
}
