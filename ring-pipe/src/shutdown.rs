//! Escalating shutdown and the reap loop.
//!
//! Shutdown is a state machine over the whole set of stages:
//!
//! ```text
//! Running ── quit observed ──> TermSent ── ~1s ──> TermResent ── ~2s ──> Killed
//!                                  └────────────── reap loop ──────────────┘──> Drained
//! ```
//!
//! The grace windows are coarse: the loop polls with `WNOHANG` and a
//! fixed 100ms sleep once termination has been requested, and the
//! re-signal thresholds are tick counts, not deadlines. The second round
//! deliberately resends SIGTERM before escalating to SIGKILL, giving
//! slow-but-cooperating stages a second chance.
//!
//! The loop never declares the ring drained until every registered PID
//! has been reaped, including stages that exited on their own before any
//! signal was sent. Failures of `kill(2)` itself are ignored — a stage
//! may legitimately die between the reap and the signal.

use crate::error::{Result, RingPipeError};
use crate::ring::Ring;
use crate::signals::QuitToken;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::Duration;

/// Sleep between non-blocking reap polls once termination is underway.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Idle polls before the termination signal is resent (~1 second).
const RESEND_AFTER_TICKS: u32 = 10;
/// Idle polls before escalating to SIGKILL (~2 seconds).
const KILL_AFTER_TICKS: u32 = 20;

/// Severity never decreases: states only move rightwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum EscalationState {
    Running,
    TermSent,
    TermResent,
    Killed,
    Drained,
}

/// The escalation clock, separated from the reap loop so the schedule is
/// checkable on its own.
pub(crate) struct Escalator {
    state: EscalationState,
    idle_ticks: u32,
}

impl Escalator {
    pub(crate) fn new() -> Self {
        Self {
            state: EscalationState::Running,
            idle_ticks: 0,
        }
    }

    pub(crate) fn state(&self) -> EscalationState {
        self.state
    }

    pub(crate) fn is_escalating(&self) -> bool {
        self.state != EscalationState::Running
    }

    /// First observation of the quit request: returns the signal to
    /// broadcast and starts the escalation clock.
    pub(crate) fn begin_shutdown(&mut self) -> Signal {
        self.state = EscalationState::TermSent;
        self.idle_ticks = 0;
        Signal::SIGTERM
    }

    /// One idle poll elapsed; returns a signal when a grace window just
    /// expired.
    pub(crate) fn tick(&mut self) -> Option<Signal> {
        self.idle_ticks += 1;
        match (self.state, self.idle_ticks) {
            (EscalationState::TermSent, RESEND_AFTER_TICKS) => {
                self.state = EscalationState::TermResent;
                Some(Signal::SIGTERM)
            }
            (EscalationState::TermSent | EscalationState::TermResent, KILL_AFTER_TICKS) => {
                self.state = EscalationState::Killed;
                Some(Signal::SIGKILL)
            }
            _ => None,
        }
    }

    pub(crate) fn mark_drained(&mut self) {
        self.state = EscalationState::Drained;
    }
}

fn signal_live_stages(ring: &Ring, sig: Signal) {
    for stage in ring.stages() {
        if let Some(pid) = stage.pid {
            if let Err(e) = kill(pid, sig) {
                tracing::debug!(pid = pid.as_raw(), signal = %sig, errno = %e, "kill ignored");
            }
        }
    }
}

/// Reap every stage, escalating termination once the quit token is
/// observed. Returns the pipeline's exit code: 127 when any stage failed
/// to exec, 0 otherwise — shutdown by plain interrupt alone still exits
/// clean.
pub(crate) fn drain(ring: &mut Ring, token: QuitToken, launch_failed: bool) -> Result<i32> {
    let mut escalator = Escalator::new();
    let mut flags = WaitPidFlag::empty();
    let mut live = ring.live_count();

    while live > 0 {
        if token.is_requested() && !escalator.is_escalating() {
            let sig = escalator.begin_shutdown();
            tracing::debug!(live, signal = %sig, "termination requested");
            signal_live_stages(ring, sig);
            // From here on the escalation clock must keep advancing even
            // while children are still exiting.
            flags |= WaitPidFlag::WNOHANG;
        }

        match waitpid(None::<Pid>, Some(flags)) {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(RingPipeError::resource("waitpid", e)),
            Ok(WaitStatus::StillAlive) => {
                if let Some(sig) = escalator.tick() {
                    tracing::debug!(signal = %sig, state = ?escalator.state(), "escalating");
                    signal_live_stages(ring, sig);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Ok(WaitStatus::Exited(pid, code)) => {
                let index = ring.mark_reaped(pid)?;
                live -= 1;
                tracing::debug!(stage = index, pid = pid.as_raw(), code, "stage exited");
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                let index = ring.mark_reaped(pid)?;
                live -= 1;
                tracing::debug!(stage = index, pid = pid.as_raw(), signal = %sig, "stage killed");
            }
            Ok(status) => {
                return Err(RingPipeError::internal(format!(
                    "unexpected wait status: {status:?}"
                )));
            }
        }
    }

    escalator.mark_drained();
    tracing::debug!("ring drained");
    Ok(if launch_failed {
        crate::EXIT_LAUNCH_FAILURE
    } else {
        0
    })
}
