//! Stage registry: allocates every descriptor up front and fixes the
//! ring topology.
//!
//! A [`Ring`] is a contiguous `Vec` of stages in declaration order;
//! "next" and "prev" are plain index arithmetic modulo N. Stage i's data
//! pipe carries stage i's stdout into stage (i+1 mod N)'s stdin, so the
//! last stage wraps around to the first and a one-stage ring feeds its
//! own output back into its own input.
//!
//! Besides the data pipe, every stage owns two startup-only sync
//! channels, named for the direction their payload travels:
//!
//! - `ready` (child → parent): the child writes one marker byte once its
//!   descriptor cleanup is done. The child-side write end carries
//!   `FD_CLOEXEC`, so a successful exec closes it and the parent reads
//!   EOF — that silence *is* the success signal.
//! - `release` (parent → child): never written. The parent closing every
//!   write end is the broadcast that all stages finished cleanup and may
//!   exec.
//!
//! All descriptors are `OwnedFd`s: each end has exactly one owner at any
//! time, and dropping the bundle is the close. Everything is allocated
//! before the first fork; an allocation failure is fatal before any
//! child exists.

pub(crate) mod manifest;

use crate::error::{Result, RingPipeError};
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::unistd::{Pid, pipe};
use std::ffi::{CString, OsString};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;

/// One element of the ring: argv plus the descriptors allocated for it.
///
/// `Option` fields model ownership handoff: the parent drops the
/// child-side ends after forking, the barrier drops its ends as the
/// handshake completes, and `pid` drops back to `None` once reaped.
#[derive(Debug)]
pub(crate) struct Stage {
    pub(crate) argv: Vec<CString>,
    /// argv joined for diagnostics.
    pub(crate) command: String,
    /// Data pipe: this stage's stdout, the next stage's stdin.
    pub(crate) data_read: Option<OwnedFd>,
    pub(crate) data_write: Option<OwnedFd>,
    /// Ready channel, child → parent. Write end is close-on-exec.
    pub(crate) ready_read: Option<OwnedFd>,
    pub(crate) ready_write: Option<OwnedFd>,
    /// Release channel, parent → child. Only ever closed, never written.
    pub(crate) release_read: Option<OwnedFd>,
    pub(crate) release_write: Option<OwnedFd>,
    pub(crate) pid: Option<Pid>,
}

impl Stage {
    fn new(index: usize, argv_os: Vec<OsString>) -> Result<Self> {
        if argv_os.is_empty() {
            return Err(RingPipeError::EmptyStage { index });
        }
        let argv = argv_os
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| RingPipeError::InvalidArgument { index })?;
        let command = argv_os
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        let (data_read, data_write) =
            pipe().map_err(|e| RingPipeError::resource("pipe", e))?;
        let (ready_read, ready_write) =
            pipe().map_err(|e| RingPipeError::resource("pipe", e))?;
        // Close-on-exec on exactly the child-write end: its disappearance
        // at exec time is what round two of the barrier listens for.
        fcntl(&ready_write, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| RingPipeError::resource("fcntl(FD_CLOEXEC)", e))?;
        let (release_read, release_write) =
            pipe().map_err(|e| RingPipeError::resource("pipe", e))?;

        Ok(Self {
            argv,
            command,
            data_read: Some(data_read),
            data_write: Some(data_write),
            ready_read: Some(ready_read),
            ready_write: Some(ready_write),
            release_read: Some(release_read),
            release_write: Some(release_write),
            pid: None,
        })
    }
}

/// The circular sequence of stages.
#[derive(Debug)]
pub(crate) struct Ring {
    stages: Vec<Stage>,
    /// Basename the orchestrator was invoked as; used to prefix the
    /// child-side failure lines.
    pub(crate) program_name: String,
}

impl Ring {
    /// Allocate a fully-populated ring from per-stage argument vectors.
    ///
    /// Insertion order is ring order; the last stage wraps back to the
    /// first. Nothing is forked here — a failure leaves no children
    /// behind.
    pub(crate) fn build(groups: Vec<Vec<OsString>>, program_name: &str) -> Result<Self> {
        let mut stages = Vec::with_capacity(groups.len());
        for (index, argv_os) in groups.into_iter().enumerate() {
            stages.push(Stage::new(index, argv_os)?);
        }
        if stages.is_empty() {
            return Err(RingPipeError::internal("ring built with zero stages"));
        }
        tracing::debug!(stages = stages.len(), "ring allocated");
        Ok(Self {
            stages,
            program_name: program_name.to_owned(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn next_index(&self, i: usize) -> usize {
        (i + 1) % self.stages.len()
    }

    pub(crate) fn prev_index(&self, i: usize) -> usize {
        (i + self.stages.len() - 1) % self.stages.len()
    }

    pub(crate) fn stage(&self, i: usize) -> &Stage {
        &self.stages[i]
    }

    pub(crate) fn stage_mut(&mut self, i: usize) -> &mut Stage {
        &mut self.stages[i]
    }

    pub(crate) fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    pub(crate) fn stages_mut(&mut self) -> impl Iterator<Item = &mut Stage> {
        self.stages.iter_mut()
    }

    /// Number of stages whose PID has not been reaped yet.
    pub(crate) fn live_count(&self) -> usize {
        self.stages.iter().filter(|s| s.pid.is_some()).count()
    }

    /// Mark the stage owning `pid` as reaped.
    pub(crate) fn mark_reaped(&mut self, pid: Pid) -> Result<usize> {
        for (index, stage) in self.stages.iter_mut().enumerate() {
            if stage.pid == Some(pid) {
                stage.pid = None;
                return Ok(index);
            }
        }
        Err(RingPipeError::internal(format!(
            "wait returned pid {pid} which belongs to no stage"
        )))
    }
}
