use assert_cmd::Command;
use predicates::prelude::*;

/// The top-level surface stays stable: every documented command group is
/// listed in --help.
#[test]
fn help_lists_all_command_groups() {
    let mut cmd = Command::cargo_bin("pkd").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("db"))
        .stdout(predicate::str::contains("config-hash"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("hardstop"))
        .stdout(predicate::str::contains("audit"));
}

#[test]
fn run_start_requires_run_id() {
    let mut cmd = Command::cargo_bin("pkd").unwrap();
    cmd.args(["run", "start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--run-id"));
}

#[test]
fn hardstop_reset_requires_reason_and_actor() {
    let mut cmd = Command::cargo_bin("pkd").unwrap();
    cmd.args(["hardstop", "reset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--reason"));
}

#[test]
fn audit_verify_reports_missing_file() {
    let mut cmd = Command::cargo_bin("pkd").unwrap();
    cmd.args(["audit", "verify", "--path", "/nonexistent/audit.jsonl"])
        .assert()
        .failure();
}
