#![allow(dead_code)]

use assert_cmd::Command;
use std::time::Duration;

/// Generous ceiling: the escalation schedule resolves in ~2 seconds,
/// anything near the timeout is a hang.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn ring_pipe() -> Command {
    let mut cmd = Command::cargo_bin("ring-pipe").expect("binary built");
    cmd.timeout(TEST_TIMEOUT);
    cmd
}

/// Wrap a shell snippet as one stage's argv.
pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}
