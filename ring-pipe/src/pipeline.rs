//! Public entry point: one call that takes a ring description to a
//! process exit code.
//!
//! The phases run strictly in order — signal capture, ring allocation,
//! fork, barrier round one, release broadcast, barrier round two, drain
//! — and each phase's failure mode is classified in [`crate::error`].

use crate::error::Result;
use crate::ring::Ring;
use crate::signals::SignalManager;
use crate::{barrier, launcher, shutdown};
use std::ffi::OsString;

/// A configured but not yet started ring of stages.
///
/// ```no_run
/// use ring_pipe::Pipeline;
/// use std::ffi::OsString;
///
/// let stages = vec![vec![OsString::from("cat")]];
/// let code = Pipeline::new(stages)
///     .with_program_name("ring-pipe")
///     .run()?;
/// # Ok::<(), ring_pipe::RingPipeError>(())
/// ```
pub struct Pipeline {
    stages: Vec<Vec<OsString>>,
    program_name: String,
}

impl Pipeline {
    /// Describe a pipeline. `stages` must contain at least one stage and
    /// every stage at least a program name; violations surface from
    /// [`Pipeline::run`].
    pub fn new(stages: Vec<Vec<OsString>>) -> Self {
        Self {
            stages,
            program_name: env!("CARGO_PKG_NAME").to_owned(),
        }
    }

    /// Basename used to prefix fatal stderr lines, typically the name
    /// the orchestrator binary was invoked as.
    pub fn with_program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    /// Run the ring to completion and return the process exit code:
    /// 0 when the ring drained cleanly (interrupt included), 127 when
    /// any stage failed to exec its program.
    pub fn run(self) -> Result<i32> {
        let signals = SignalManager::install()?;
        let token = signals.token();

        let mut ring = Ring::build(self.stages, &self.program_name)?;
        launcher::launch(&mut ring, &signals)?;

        // An interrupt mid-handshake skips the release: the unreleased
        // children die from the escalator's signals instead.
        let failed_stage = match barrier::await_cleanup(&ring, token)? {
            barrier::BarrierOutcome::Interrupted => None,
            barrier::BarrierOutcome::Completed => {
                barrier::release_stages(&mut ring);
                barrier::await_exec(&mut ring, token)?.failed_stage
            }
        };

        shutdown::drain(&mut ring, token, failed_stage.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::process_state_guard as fork_guard;

    fn stages(cmds: &[&[&str]]) -> Vec<Vec<OsString>> {
        cmds.iter()
            .map(|argv| argv.iter().map(OsString::from).collect())
            .collect()
    }

    #[test]
    fn test_trivial_ring_drains_clean() {
        let _guard = fork_guard();
        let code = Pipeline::new(stages(&[&["true"], &["true"], &["true"]]))
            .run()
            .expect("pipeline");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_single_stage_ring_runs_both_rounds() {
        let _guard = fork_guard();
        let code = Pipeline::new(stages(&[&["true"]])).run().expect("pipeline");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_stage_exit_status_is_not_an_error() {
        let _guard = fork_guard();
        let code = Pipeline::new(stages(&[&["false"]])).run().expect("pipeline");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_launch_failure_yields_reserved_code() {
        let _guard = fork_guard();
        let code = Pipeline::new(stages(&[
            &["/nonexistent/definitely-not-a-binary"],
            &["sleep", "30"],
        ]))
        .run()
        .expect("pipeline");
        assert_eq!(code, crate::EXIT_LAUNCH_FAILURE);
    }
}
