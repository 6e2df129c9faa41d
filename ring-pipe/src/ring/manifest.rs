//! Per-child descriptor manifest.
//!
//! After `fork()`, a child inherits every descriptor of every stage:
//! 6 per stage, N stages. All but four must go. A leaked data-pipe write
//! end anywhere in the ring keeps some reader from ever seeing EOF and
//! hangs the pipeline, so the keep/close split is computed here, in the
//! parent, as plain data — and is therefore testable without forking.
//!
//! For stage i the child retains exactly:
//!
//! - stdin source: stage (i-1 mod N)'s data-pipe read end (dup'd to 0),
//! - stdout source: stage i's data-pipe write end (dup'd to 1),
//! - its own ready-channel write end (handshake, close-on-exec),
//! - its own release-channel read end (handshake).
//!
//! Everything else — including the two dup2 sources once they have been
//! duplicated — lands in the close set.
//!
//! The manifest also pre-builds everything the post-fork path would
//! otherwise have to allocate: the exec argument pointer vector and the
//! stderr lines for the failure exits. Between `fork()` and `exec()`
//! only async-signal-safe calls are allowed, so the child must not touch
//! the heap.

use crate::error::{Result, RingPipeError};
use crate::ring::Ring;
use nix::errno::Errno;
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Errnos exec realistically fails with; anything else falls back to
/// the undetailed line.
const EXEC_ERRNOS: [Errno; 8] = [
    Errno::ENOENT,
    Errno::EACCES,
    Errno::ENOEXEC,
    Errno::ENOTDIR,
    Errno::ELOOP,
    Errno::E2BIG,
    Errno::ETXTBSY,
    Errno::ENOMEM,
];

/// Everything a forked child needs, computed before the fork.
pub(crate) struct ChildWiring<'ring> {
    /// dup2 source for fd 0: previous stage's data-pipe read end.
    pub(crate) stdin_fd: RawFd,
    /// dup2 source for fd 1: this stage's data-pipe write end.
    pub(crate) stdout_fd: RawFd,
    /// Handshake: ready-channel write end (close-on-exec).
    pub(crate) ready_fd: RawFd,
    /// Handshake: release-channel read end.
    pub(crate) release_fd: RawFd,
    /// Every other ring descriptor, dup2 sources included.
    pub(crate) close_fds: Vec<RawFd>,
    /// Borrow that keeps the argument buffers alive for `argv_ptrs`.
    #[allow(dead_code)]
    argv: &'ring [CString],
    /// NULL-terminated argument vector pointing into `argv`'s buffers.
    pub(crate) argv_ptrs: Vec<*const libc::c_char>,
    /// Pre-rendered stderr lines for the child-side failure exits. The
    /// exec lines are rendered once per plausible errno so the
    /// post-fork path can report `strerror`-style detail without
    /// allocating.
    pub(crate) wiring_error_line: Vec<u8>,
    pub(crate) handshake_error_line: Vec<u8>,
    exec_error_lines: Vec<(i32, Vec<u8>)>,
    exec_error_fallback: Vec<u8>,
}

fn raw(fd: &Option<OwnedFd>) -> Result<RawFd> {
    fd.as_ref()
        .map(AsRawFd::as_raw_fd)
        .ok_or_else(|| RingPipeError::internal("descriptor consulted after release"))
}

impl<'ring> ChildWiring<'ring> {
    /// Compute the manifest for stage `index`. Every ring descriptor must
    /// still be parent-owned, i.e. this runs before any fork.
    pub(crate) fn for_stage(ring: &'ring Ring, index: usize) -> Result<Self> {
        let stage = ring.stage(index);
        let prev = ring.stage(ring.prev_index(index));

        let stdin_fd = raw(&prev.data_read)?;
        let stdout_fd = raw(&stage.data_write)?;
        let ready_fd = raw(&stage.ready_write)?;
        let release_fd = raw(&stage.release_read)?;

        let mut close_fds = Vec::with_capacity(ring.len() * 6);
        for (j, other) in ring.stages().enumerate() {
            close_fds.push(raw(&other.data_read)?);
            close_fds.push(raw(&other.data_write)?);
            close_fds.push(raw(&other.ready_read)?);
            close_fds.push(raw(&other.release_write)?);
            if j != index {
                close_fds.push(raw(&other.ready_write)?);
                close_fds.push(raw(&other.release_read)?);
            }
        }

        let argv = stage.argv.as_slice();
        let mut argv_ptrs: Vec<*const libc::c_char> =
            argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        let prog = &ring.program_name;
        let command = &stage.command;
        let wiring_error_line =
            format!("{prog}: ERROR: stage {index} ({command}): cannot rewire stdio\n")
                .into_bytes();
        let handshake_error_line =
            format!("{prog}: ERROR: stage {index} ({command}): startup handshake failed\n")
                .into_bytes();
        let exec_prefix = format!(
            "{prog}: ERROR: stage {index}: failed to exec '{}'",
            argv[0].to_string_lossy()
        );
        let exec_error_lines = EXEC_ERRNOS
            .iter()
            .map(|&errno| {
                (errno as i32, format!("{exec_prefix}: {}\n", errno.desc()).into_bytes())
            })
            .collect();
        let exec_error_fallback = format!("{exec_prefix}\n").into_bytes();

        Ok(Self {
            stdin_fd,
            stdout_fd,
            ready_fd,
            release_fd,
            close_fds,
            argv,
            argv_ptrs,
            wiring_error_line,
            handshake_error_line,
            exec_error_lines,
            exec_error_fallback,
        })
    }

    /// Stderr line for an exec failure with the given raw errno. Slice
    /// search only; callable from the post-fork path.
    pub(crate) fn exec_error_line(&self, errno: i32) -> &[u8] {
        self.exec_error_lines
            .iter()
            .find(|(code, _)| *code == errno)
            .map(|(_, line)| line.as_slice())
            .unwrap_or(&self.exec_error_fallback)
    }
}
