//! Launch failures: reporting, sibling termination, exit code 127.

mod common;

use common::{ring_pipe, sh};
use predicates::prelude::*;

#[test]
fn missing_binary_reports_and_exits_127() {
    ring_pipe()
        .arg("/nonexistent/definitely-not-a-binary")
        .assert()
        .code(127)
        .stderr(predicate::str::contains("ERROR"))
        .stderr(predicate::str::contains("definitely-not-a-binary"));
}

#[test]
fn launch_failure_line_names_the_errno() {
    ring_pipe()
        .arg("/nonexistent/definitely-not-a-binary")
        .assert()
        .code(127)
        .stderr(predicate::str::contains("No such file or directory"));
}

#[test]
fn launch_failure_terminates_the_sibling_stage() {
    // The sibling would sleep for 30 seconds if nobody told it to stop;
    // finishing well under the test timeout means it was terminated.
    ring_pipe()
        .args(["/nonexistent/definitely-not-a-binary", "--"])
        .args(sh("exec sleep 30"))
        .assert()
        .code(127)
        .stderr(predicate::str::contains("failed to exec"));
}

#[test]
fn launch_failure_line_is_prefixed_with_program_basename() {
    ring_pipe()
        .arg("/nonexistent/definitely-not-a-binary")
        .assert()
        .code(127)
        .stderr(predicate::str::starts_with("ring-pipe: ERROR:"));
}

#[test]
fn every_stage_failing_still_exits_127() {
    ring_pipe()
        .args([
            "/nonexistent/definitely-not-a-binary",
            "--",
            "/nonexistent/also-not-a-binary",
        ])
        .assert()
        .code(127);
}
