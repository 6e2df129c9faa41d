//! Happy-path rings: construction, data flow, self-loop, drain.

mod common;

use common::{ring_pipe, sh};
use predicates::prelude::*;

#[test]
fn three_trivial_stages_drain_clean() {
    ring_pipe()
        .args(["true", "--", "true", "--", "true"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn stage_exit_status_does_not_fail_the_pipeline() {
    // A stage running and exiting non-zero is its own business.
    ring_pipe().arg("false").assert().success();
}

#[test]
fn data_flows_from_one_stage_to_the_next() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("captured");

    let producer = sh("echo hello");
    let consumer = sh(&format!("head -n1 > {}", out.display()));

    let mut cmd = ring_pipe();
    cmd.args(&producer).arg("--").args(&consumer);
    cmd.assert().success();

    let captured = std::fs::read_to_string(&out).expect("consumer wrote");
    assert_eq!(captured, "hello\n");
}

#[test]
fn single_stage_reads_back_its_own_output() {
    // N = 1: the stage's stdout pipe loops straight into its stdin.
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("loopback");

    let stage = sh(&format!("echo once; head -n1 > {}", out.display()));

    let mut cmd = ring_pipe();
    cmd.args(&stage);
    cmd.assert().success();

    let captured = std::fs::read_to_string(&out).expect("stage wrote");
    assert_eq!(captured, "once\n");
}

#[test]
fn ring_wraps_last_stage_back_to_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("wrapped");

    // Stage 0 consumes what stage 2 produced: proof the ring is closed.
    let first = sh(&format!("head -n1 > {}", out.display()));
    let second = sh("cat");
    let third = sh("echo around");

    let mut cmd = ring_pipe();
    cmd.args(&first)
        .arg("--")
        .args(&second)
        .arg("--")
        .args(&third);
    cmd.assert().success();

    let captured = std::fs::read_to_string(&out).expect("first stage wrote");
    assert_eq!(captured, "around\n");
}
