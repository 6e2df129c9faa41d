//! Error taxonomy for the orchestrator.
//!
//! Only conditions that abort the run are errors:
//! - [`RingPipeError::Resource`]: pipe/fork/wait syscalls failing, i.e.
//!   system resource exhaustion. Fatal; no cleanup of stages that were
//!   never created is attempted.
//! - [`RingPipeError::Protocol`]: a child's handshake byte stream did not
//!   match the readiness/failure contract. Internal-error class, fatal.
//! - [`RingPipeError::EmptyStage`] / [`RingPipeError::InvalidArgument`]:
//!   a stage argv that cannot be turned into an exec argument vector.
//!
//! A stage failing to exec its program is *not* an `Err`: it is handled
//! by shutting the ring down and is reported through the pipeline's exit
//! code (127). A stage's program exiting on its own, successfully or not,
//! is plain bookkeeping in the reap loop.

use nix::errno::Errno;
use thiserror::Error;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum RingPipeError {
    /// A syscall failed while allocating or driving the ring.
    #[error("{op}: {source}")]
    Resource {
        op: &'static str,
        #[source]
        source: Errno,
    },

    /// A stage violated the startup handshake contract.
    #[error("stage {index} ({command}): {detail}")]
    Protocol {
        index: usize,
        command: String,
        detail: String,
    },

    /// A stage was declared with no command at all.
    #[error("stage {index} has no command")]
    EmptyStage { index: usize },

    /// A stage argument contains an interior NUL byte and cannot be
    /// passed to exec.
    #[error("stage {index}: argument contains an interior NUL byte")]
    InvalidArgument { index: usize },

    /// Invariant breakage inside the orchestrator itself.
    #[error("internal: {0}")]
    Internal(String),
}

impl RingPipeError {
    pub(crate) fn resource(op: &'static str, source: Errno) -> Self {
        Self::Resource { op, source }
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

pub type Result<T> = std::result::Result<T, RingPipeError>;
