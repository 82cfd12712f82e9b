#![cfg(unix)]

//! CLI-level tests for the `send` subcommand, spawning the real binary.

use std::process::Command;

fn workpool_bin() -> &'static str {
    env!("CARGO_BIN_EXE_workpool")
}

#[test]
fn send_prints_the_response() {
    let output = Command::new(workpool_bin())
        .args(["send", "--data", "Testing 1", "--", workpool_bin(), "worker"])
        .output()
        .expect("send should run");

    assert!(output.status.success(), "send should exit 0: {output:?}");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "3560b3b3658d3f95d320367b007ee2b6\n"
    );
}

#[test]
fn send_with_stderr_forwards_the_error_channel() {
    let output = Command::new(workpool_bin())
        .args([
            "send",
            "--data",
            "stderr echo hello",
            "--with-stderr",
            "--",
            workpool_bin(),
            "worker",
        ])
        .output()
        .expect("send should run");

    assert!(output.status.success(), "send should exit 0: {output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "\n");
    assert_eq!(
        String::from_utf8_lossy(&output.stderr),
        "stderr echo hello"
    );
}

#[test]
fn send_fails_cleanly_when_the_worker_cannot_spawn() {
    let output = Command::new(workpool_bin())
        .args(["send", "--data", "x", "--", "/nonexistent/worker-binary"])
        .output()
        .expect("send should run");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to spawn worker"));
}
