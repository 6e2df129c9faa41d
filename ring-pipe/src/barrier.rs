//! Two-round startup barrier.
//!
//! Round one is an all-or-none gate: no child is released to exec until
//! every child has reported, with one marker byte on its ready channel,
//! that its descriptor cleanup is finished. Without the gate a fast
//! stage could start pumping pipeline data while a slow sibling still
//! holds stray pipe ends. The release itself is silent — the parent
//! closes every release-channel write end and each child reads EOF.
//!
//! Round two resolves each stage's exec outcome. The ready channel's
//! child-side write end is close-on-exec, so EOF means the target
//! program is running; an explicit failure marker means exec could not
//! be invoked. The first failure short-circuits the round: remaining
//! stages are left unresolved, the quit token is raised, and the
//! shutdown escalator takes it from there.
//!
//! Both rounds multiplex over `poll(2)`. `EINTR` surfaces as an empty
//! batch, and each round consults the quit token before re-polling: a
//! termination signal while a stage is stalled mid-handshake cuts the
//! round short and hands the ring to the shutdown escalator instead of
//! waiting the stall out. Any byte or poll event outside the contract
//! is a protocol violation and fatal to the whole run.

use crate::error::{Result, RingPipeError};
use crate::ring::Ring;
use crate::signals::QuitToken;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

/// Wire marker: child finished descriptor cleanup.
pub(crate) const READY_MARKER: u8 = b'P';
/// Wire marker: child could not exec its program.
pub(crate) const LAUNCH_FAILED_MARKER: u8 = b'E';

/// Outcome of round two for a single stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExecOutcome {
    Pending,
    Execed,
    LaunchFailed,
}

/// What round two learned about the ring.
#[derive(Debug)]
pub(crate) struct ExecReport {
    /// First stage observed to fail exec, if any.
    pub(crate) failed_stage: Option<usize>,
}

/// Whether a barrier round ran to completion or was cut short by a
/// quit request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BarrierOutcome {
    Completed,
    Interrupted,
}

fn ready_read_fd<'a>(ring: &'a Ring, index: usize) -> Result<BorrowedFd<'a>> {
    ring.stage(index)
        .ready_read
        .as_ref()
        .map(|fd| fd.as_fd())
        .ok_or_else(|| RingPipeError::internal("ready channel consulted after release"))
}

fn protocol(ring: &Ring, index: usize, detail: impl Into<String>) -> RingPipeError {
    RingPipeError::Protocol {
        index,
        command: ring.stage(index).command.clone(),
        detail: detail.into(),
    }
}

/// Read a single marker byte; `Ok(None)` is end-of-channel.
fn read_marker_byte(fd: BorrowedFd<'_>) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        // Raw read: one byte off a pipe the caller saw POLLIN on.
        let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), 1) };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                continue;
            }
            return Err(RingPipeError::resource("read", errno));
        }
        return Ok(if n == 0 { None } else { Some(buf[0]) });
    }
}

/// Poll the pending stages' ready channels once, returning the stages
/// with events. `EINTR` surfaces as an empty batch so callers re-loop
/// and observe any state that changed underneath them.
fn poll_ready(ring: &Ring, pending: &[usize]) -> Result<Vec<(usize, PollFlags)>> {
    let mut pollfds = Vec::with_capacity(pending.len());
    for &i in pending {
        pollfds.push(PollFd::new(ready_read_fd(ring, i)?, PollFlags::POLLIN));
    }
    match poll(&mut pollfds, PollTimeout::NONE) {
        Err(Errno::EINTR) => return Ok(Vec::new()),
        Err(e) => return Err(RingPipeError::resource("poll", e)),
        Ok(_) => {}
    }
    Ok(pending
        .iter()
        .zip(&pollfds)
        .filter_map(|(&i, pfd)| {
            let revents = pfd.revents().unwrap_or(PollFlags::empty());
            (!revents.is_empty()).then_some((i, revents))
        })
        .collect())
}

/// Round one: block until every stage has sent its readiness marker,
/// or until a quit request makes waiting pointless (the unreleased
/// children are the escalator's problem then).
pub(crate) fn await_cleanup(ring: &Ring, token: QuitToken) -> Result<BarrierOutcome> {
    let mut pending: Vec<usize> = (0..ring.len()).collect();
    while !pending.is_empty() {
        if token.is_requested() {
            tracing::debug!(pending = pending.len(), "round one interrupted");
            return Ok(BarrierOutcome::Interrupted);
        }
        for (index, revents) in poll_ready(ring, &pending)? {
            if !revents.contains(PollFlags::POLLIN) {
                return Err(protocol(
                    ring,
                    index,
                    format!("unexpected poll events {revents:?} before readiness marker"),
                ));
            }
            match read_marker_byte(ready_read_fd(ring, index)?)? {
                Some(READY_MARKER) => {
                    tracing::trace!(stage = index, "cleanup complete");
                    pending.retain(|&i| i != index);
                }
                Some(other) => {
                    return Err(protocol(
                        ring,
                        index,
                        format!("unexpected marker byte 0x{other:02x}, expected readiness"),
                    ));
                }
                None => {
                    return Err(protocol(
                        ring,
                        index,
                        "ready channel closed before readiness marker",
                    ));
                }
            }
        }
    }
    tracing::debug!(stages = ring.len(), "all stages finished cleanup");
    Ok(BarrierOutcome::Completed)
}

/// Broadcast "go": close every release-channel write end. Each child
/// observes EOF and proceeds to exec. Only valid once [`await_cleanup`]
/// returned for every stage.
pub(crate) fn release_stages(ring: &mut Ring) {
    for stage in ring.stages_mut() {
        stage.release_write.take();
    }
    tracing::debug!("release broadcast sent");
}

/// Round two: learn each stage's exec outcome. The first failure
/// short-circuits and raises the quit token.
pub(crate) fn await_exec(ring: &mut Ring, token: QuitToken) -> Result<ExecReport> {
    let mut outcomes = vec![ExecOutcome::Pending; ring.len()];
    let mut report = ExecReport { failed_stage: None };

    'rounds: loop {
        let pending: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| **o == ExecOutcome::Pending)
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            break;
        }
        // A quit request set from outside (signal) while outcomes are
        // still pending: stop waiting, let the escalator terminate the
        // already-released stages.
        if token.is_requested() {
            tracing::debug!(pending = pending.len(), "round two interrupted");
            break;
        }
        for (index, revents) in poll_ready(ring, &pending)? {
            if revents.contains(PollFlags::POLLIN) {
                match read_marker_byte(ready_read_fd(ring, index)?)? {
                    Some(LAUNCH_FAILED_MARKER) => {
                        outcomes[index] = ExecOutcome::LaunchFailed;
                        report.failed_stage = Some(index);
                        tracing::warn!(
                            stage = index,
                            command = %ring.stage(index).command,
                            "stage failed to launch"
                        );
                        // Stop waiting on the rest; the escalator will
                        // terminate whatever is still alive.
                        token.request();
                        break 'rounds;
                    }
                    Some(other) => {
                        return Err(protocol(
                            ring,
                            index,
                            format!("unexpected marker byte 0x{other:02x} in exec outcome"),
                        ));
                    }
                    None => {
                        outcomes[index] = ExecOutcome::Execed;
                        tracing::trace!(stage = index, "exec confirmed");
                    }
                }
            } else if revents.contains(PollFlags::POLLHUP) {
                outcomes[index] = ExecOutcome::Execed;
                tracing::trace!(stage = index, "exec confirmed");
            } else {
                return Err(protocol(
                    ring,
                    index,
                    format!("unexpected poll events {revents:?} in exec outcome"),
                ));
            }
        }
    }

    // Handshake over either way; the parent has no further use for the
    // ready channels.
    for stage in ring.stages_mut() {
        stage.ready_read.take();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::atomic::AtomicBool;

    fn build(n: usize) -> Ring {
        let groups = (0..n)
            .map(|i| vec![OsString::from(format!("cmd{i}"))])
            .collect();
        Ring::build(groups, "ring-pipe").expect("build")
    }

    fn write_byte(ring: &Ring, index: usize, byte: u8) {
        let fd = ring
            .stage(index)
            .ready_write
            .as_ref()
            .expect("child end present")
            .as_raw_fd();
        let n = unsafe { libc::write(fd, [byte].as_ptr().cast(), 1) };
        assert_eq!(n, 1);
    }

    fn close_child_end(ring: &mut Ring, index: usize) {
        ring.stage_mut(index).ready_write.take();
    }

    fn test_token(flag: &'static AtomicBool) -> QuitToken {
        QuitToken::new(flag)
    }

    #[test]
    fn test_round_one_waits_for_every_stage() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let ring = build(3);
        for i in 0..3 {
            write_byte(&ring, i, READY_MARKER);
        }
        let outcome = await_cleanup(&ring, test_token(&FLAG)).expect("all ready");
        assert_eq!(outcome, BarrierOutcome::Completed);
    }

    #[test]
    fn test_round_one_rejects_wrong_marker() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let ring = build(2);
        write_byte(&ring, 0, b'?');
        let err = await_cleanup(&ring, test_token(&FLAG)).unwrap_err();
        assert!(matches!(err, RingPipeError::Protocol { index: 0, .. }));
    }

    #[test]
    fn test_round_one_rejects_early_close() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let mut ring = build(2);
        write_byte(&ring, 1, READY_MARKER);
        close_child_end(&mut ring, 0);
        let err = await_cleanup(&ring, test_token(&FLAG)).unwrap_err();
        assert!(matches!(err, RingPipeError::Protocol { index: 0, .. }));
    }

    #[test]
    fn test_round_one_cut_short_by_quit_request() {
        // No stage has reported; a quit request must not leave the
        // round blocked in poll waiting the stall out.
        static FLAG: AtomicBool = AtomicBool::new(true);
        let ring = build(2);
        let outcome = await_cleanup(&ring, test_token(&FLAG)).expect("interrupted");
        assert_eq!(outcome, BarrierOutcome::Interrupted);
    }

    #[test]
    fn test_release_closes_every_broadcast_end() {
        let mut ring = build(3);
        release_stages(&mut ring);
        assert!(ring.stages().all(|s| s.release_write.is_none()));
    }

    #[test]
    fn test_round_two_eof_means_exec_succeeded() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let mut ring = build(2);
        close_child_end(&mut ring, 0);
        close_child_end(&mut ring, 1);
        let report = await_exec(&mut ring, test_token(&FLAG)).expect("round two");
        assert_eq!(report.failed_stage, None);
        assert!(!test_token(&FLAG).is_requested());
        // Parent side of the ready channels is released afterwards.
        assert!(ring.stages().all(|s| s.ready_read.is_none()));
    }

    #[test]
    fn test_round_two_failure_short_circuits_and_raises_quit() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let mut ring = build(3);
        // Stage 1 reports exec failure; stages 0 and 2 stay unresolved
        // (their child-side ends remain open) and must not be waited on.
        write_byte(&ring, 1, LAUNCH_FAILED_MARKER);
        close_child_end(&mut ring, 1);
        let report = await_exec(&mut ring, test_token(&FLAG)).expect("round two");
        assert_eq!(report.failed_stage, Some(1));
        assert!(test_token(&FLAG).is_requested());
    }

    #[test]
    fn test_round_two_cut_short_by_quit_request() {
        static FLAG: AtomicBool = AtomicBool::new(true);
        let mut ring = build(2);
        // Neither child end has resolved; the pending outcomes are
        // abandoned to the escalator.
        let report = await_exec(&mut ring, test_token(&FLAG)).expect("interrupted");
        assert_eq!(report.failed_stage, None);
        assert!(ring.stages().all(|s| s.ready_read.is_none()));
    }

    #[test]
    fn test_round_two_rejects_stray_marker() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let mut ring = build(1);
        write_byte(&ring, 0, b'Z');
        let err = await_exec(&mut ring, test_token(&FLAG)).unwrap_err();
        assert!(matches!(err, RingPipeError::Protocol { index: 0, .. }));
    }
}
