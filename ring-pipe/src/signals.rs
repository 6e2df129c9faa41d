//! SIGINT/SIGTERM capture for cooperative shutdown.
//!
//! The handler body is a single atomic store; everything consequential
//! (sending termination signals, changing barrier behavior) happens back
//! in the orchestrator's normal control flow the next time it polls the
//! [`QuitToken`]. Handlers are installed without `SA_RESTART` on purpose:
//! the blocking `poll(2)` and `waitpid(2)` calls must return `EINTR` so
//! the quit flag is observed promptly.
//!
//! The previous dispositions are saved so a forked child can restore them
//! before exec — a target program that installs no handlers of its own
//! then runs under whatever semantics were in effect when the
//! orchestrator started.

use crate::error::{Result, RingPipeError};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};

/// Signals that request shutdown of the whole pipeline.
const MANAGED_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_termination_signal(_signum: libc::c_int) {
    // Async-signal-safe: a lone atomic store, nothing else.
    QUIT_REQUESTED.store(true, Ordering::SeqCst);
}

/// Shared-ownership view of the process-wide quit flag.
///
/// Copyable so every phase of the run can poll it without threading a
/// reference through. [`QuitToken::request`] lets non-signal code (the
/// startup barrier, on exec failure) trigger the same shutdown path.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QuitToken {
    flag: &'static AtomicBool,
}

impl QuitToken {
    pub(crate) fn new(flag: &'static AtomicBool) -> Self {
        Self { flag }
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Installs the quit handlers and remembers what they replaced.
pub(crate) struct SignalManager {
    saved: Vec<(Signal, SigAction)>,
}

impl SignalManager {
    /// Install the quit handler for every managed signal.
    ///
    /// Both managed signals are masked while the handler runs, so two
    /// near-simultaneous deliveries cannot interleave.
    pub(crate) fn install() -> Result<Self> {
        // A new manager starts from a quiet flag; a request left over
        // from an earlier run in the same process must not leak in.
        QUIT_REQUESTED.store(false, Ordering::SeqCst);

        let mut mask = SigSet::empty();
        for sig in MANAGED_SIGNALS {
            mask.add(sig);
        }
        let action = SigAction::new(
            SigHandler::Handler(on_termination_signal),
            SaFlags::empty(),
            mask,
        );

        let mut saved = Vec::with_capacity(MANAGED_SIGNALS.len());
        for sig in MANAGED_SIGNALS {
            // SAFETY: the handler performs a single atomic store.
            let old = unsafe { sigaction(sig, &action) }
                .map_err(|e| RingPipeError::resource("sigaction", e))?;
            saved.push((sig, old));
        }
        tracing::debug!(signals = ?MANAGED_SIGNALS, "quit handlers installed");
        Ok(Self { saved })
    }

    pub(crate) fn token(&self) -> QuitToken {
        QuitToken::new(&QUIT_REQUESTED)
    }

    /// Put the saved dispositions back. Called in a forked child before
    /// exec; restricted to async-signal-safe work.
    pub(crate) fn restore_in_child(&self) {
        for (sig, old) in &self.saved {
            // SAFETY: reinstalling a disposition that was previously in
            // effect for this very process image.
            let _ = unsafe { sigaction(*sig, old) };
        }
    }
}

// Tests that fork or swap process-wide signal state share one process;
// serializing them keeps waitpid(-1) and handler installs from crossing
// wires between test threads.
#[cfg(test)]
pub(crate) fn process_state_guard() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}
