//! Integration tests for the `ctdbc` binary entry point.
//!
//! Covers argument errors and an unreachable daemon; daemon conversations
//! are exercised in-process by the library tests.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_the_commands() {
    let mut command = cargo_bin_cmd!("ctdbc");
    command.arg("--help");
    command
        .assert()
        .success()
        .stdout(contains("listen"))
        .stdout(contains("--daemon-socket"));
}

#[test]
fn missing_command_exits_with_failure() {
    let mut command = cargo_bin_cmd!("ctdbc");
    command
        .assert()
        .failure()
        .stderr(contains("Usage"));
}

#[test]
fn unreachable_daemon_is_reported() {
    let dir = tempfile::tempdir().expect("temporary directory");
    let socket = dir.path().join("absent.socket");
    let mut command = cargo_bin_cmd!("ctdbc");
    command
        .arg("--daemon-socket")
        .arg(&socket)
        .arg("pnn")
        .env_remove("CTDB_DAEMON_SOCKET");
    command
        .assert()
        .failure()
        .stderr(contains("failed to connect"))
        .stderr(contains("absent.socket"));
}

#[test]
fn configuration_comes_from_the_environment() {
    let dir = tempfile::tempdir().expect("temporary directory");
    let socket = dir.path().join("from-env.socket");
    let mut command = cargo_bin_cmd!("ctdbc");
    command.arg("pnn").env("CTDB_DAEMON_SOCKET", &socket);
    command
        .assert()
        .failure()
        .stderr(contains("from-env.socket"));
}
