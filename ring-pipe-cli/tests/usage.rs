//! Invocation grammar: separators, usage errors, help.

mod common;

use common::ring_pipe;
use predicates::prelude::*;

#[test]
fn custom_separator_builds_the_same_ring() {
    ring_pipe()
        .args(["-s", "+++", "--", "true", "+++", "true"])
        .assert()
        .success();
}

#[test]
fn custom_separator_without_leading_double_dash() {
    // Option parsing stops at the first non-option argument, so the
    // leading literal '--' is only required when the first token after
    // the options would otherwise look like an option.
    ring_pipe()
        .args(["--separator", "+++", "true", "+++", "true"])
        .assert()
        .success();
}

#[test]
fn double_dash_inside_a_stage_stays_literal_under_custom_separator() {
    ring_pipe()
        .args(["-s", "+++", "--", "echo", "--", "+++", "true"])
        .assert()
        .success();
}

#[test]
fn no_stages_is_a_usage_error() {
    ring_pipe()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn unknown_option_is_a_usage_error() {
    ring_pipe()
        .arg("--bogus")
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("ring-pipe: ERROR:"))
        .stderr(predicate::str::contains("--bogus"))
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn separator_missing_its_argument_is_a_usage_error() {
    ring_pipe()
        .arg("--separator")
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("ring-pipe: ERROR:"))
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn trailing_separator_is_a_usage_error() {
    ring_pipe()
        .args(["true", "--"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ERROR"))
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn adjacent_separators_are_a_usage_error() {
    ring_pipe()
        .args(["true", "--", "--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ERROR"));
}

#[test]
fn help_prints_usage_and_the_separator_remark() {
    ring_pipe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("literal '--'"));
}
