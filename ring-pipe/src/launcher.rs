//! Forks one process per stage and walks each child to its exec.
//!
//! The child-side path runs between `fork()` and `exec()` and is held to
//! the same discipline as a `pre_exec` hook: async-signal-safe syscalls
//! only — no heap, no locks, no logging. Everything it needs (dup2
//! sources, close set, argv pointer vector, stderr lines) is prepared in
//! the parent as a [`ChildWiring`] manifest before the fork.
//!
//! Child sequence: restore signal dispositions, dup2 the ring pipes onto
//! stdin/stdout, close every descriptor in the manifest's close set,
//! send the readiness marker, block on the release channel until EOF,
//! exec. On exec failure the child writes its pre-built stderr line,
//! sends the failure marker, and `_exit(127)`s — it never returns into
//! ring bookkeeping, so no destructors touch the inherited descriptors.

use crate::barrier::{LAUNCH_FAILED_MARKER, READY_MARKER};
use crate::error::{Result, RingPipeError};
use crate::ring::Ring;
use crate::ring::manifest::ChildWiring;
use crate::signals::SignalManager;
use nix::errno::Errno;
use nix::unistd::{ForkResult, fork};

/// Fork every stage in ring order, then shed the parent's copies of all
/// child-side descriptors.
///
/// A fork failure is fatal and aborts immediately: already-forked
/// children are left to the process exit, which closes the release
/// channels and lets them run free rather than hang.
pub(crate) fn launch(ring: &mut Ring, signals: &SignalManager) -> Result<()> {
    for index in 0..ring.len() {
        let child = {
            let wiring = ChildWiring::for_stage(ring, index)?;
            // SAFETY: the orchestrator is single-threaded, and the child
            // branch below confines itself to async-signal-safe calls
            // before exec or _exit.
            match unsafe { fork() } {
                Err(e) => return Err(RingPipeError::resource("fork", e)),
                Ok(ForkResult::Child) => run_child(&wiring, signals),
                Ok(ForkResult::Parent { child }) => child,
            }
        };
        tracing::debug!(
            stage = index,
            pid = child.as_raw(),
            feeds = ring.next_index(index),
            command = %ring.stage(index).command,
            "stage forked"
        );
        ring.stage_mut(index).pid = Some(child);
    }

    // Parent keeps only its ends of the handshake: the ready read and
    // the release write. Everything else now belongs to the children.
    for stage in ring.stages_mut() {
        stage.data_read.take();
        stage.data_write.take();
        stage.ready_write.take();
        stage.release_read.take();
    }
    Ok(())
}

/// Child-side path; never returns.
fn run_child(wiring: &ChildWiring<'_>, signals: &SignalManager) -> ! {
    // The target program inherits whatever dispositions were in effect
    // before the orchestrator installed its own.
    signals.restore_in_child();

    unsafe {
        if libc::dup2(wiring.stdin_fd, libc::STDIN_FILENO) < 0
            || libc::dup2(wiring.stdout_fd, libc::STDOUT_FILENO) < 0
        {
            child_abort(&wiring.wiring_error_line, 1);
        }

        // Leak prevention: drop every ring descriptor this child does
        // not own, the freshly-duplicated stdio sources included.
        for &fd in &wiring.close_fds {
            libc::close(fd);
        }

        // Round one: report cleanup complete.
        let marker = [READY_MARKER];
        if libc::write(wiring.ready_fd, marker.as_ptr().cast(), 1) != 1 {
            child_abort(&wiring.handshake_error_line, 1);
        }

        // Block until the parent's broadcast. The release channel is
        // never written to, so anything but EOF is a violation.
        let mut buf = [0u8; 1];
        loop {
            let n = libc::read(wiring.release_fd, buf.as_mut_ptr().cast(), 1);
            if n == 0 {
                break;
            }
            if n < 0 && Errno::last() == Errno::EINTR {
                continue;
            }
            child_abort(&wiring.handshake_error_line, 1);
        }
        libc::close(wiring.release_fd);

        libc::execvp(wiring.argv_ptrs[0], wiring.argv_ptrs.as_ptr());

        // exec could not be invoked. The ready channel survived (its
        // close-on-exec flag never fired), so tell the parent before
        // bailing with the reserved status.
        let line = wiring.exec_error_line(Errno::last_raw());
        let _ = libc::write(libc::STDERR_FILENO, line.as_ptr().cast(), line.len());
        let marker = [LAUNCH_FAILED_MARKER];
        let _ = libc::write(wiring.ready_fd, marker.as_ptr().cast(), 1);
        libc::close(wiring.ready_fd);
        libc::_exit(crate::EXIT_LAUNCH_FAILURE);
    }
}

/// Write a pre-built line to stderr and terminate without unwinding.
fn child_abort(line: &[u8], code: i32) -> ! {
    unsafe {
        let _ = libc::write(libc::STDERR_FILENO, line.as_ptr().cast(), line.len());
        libc::_exit(code);
    }
}
