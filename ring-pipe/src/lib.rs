//! Closed-ring pipeline orchestration.
//!
//! The shell's `|` operator builds a linear chain: each command's stdout
//! feeds the next command's stdin, and the ends dangle. This crate closes
//! the chain into a ring of N external commands ("stages"): stage i's
//! stdout is wired to stage (i+1 mod N)'s stdin, and the last stage's
//! stdout wraps around to stage 0's stdin. A single stage forms a
//! self-loop. No named FIFOs are involved; everything runs over anonymous
//! pipes owned by the orchestrator until the children take over.
//!
//! # Architecture
//!
//! ```text
//! ring-pipe/
//! ├── ring/        stage registry: pipe + sync-channel allocation,
//! │                ring-index topology, per-child descriptor manifest
//! ├── launcher     fork per stage, child-side rewiring and exec
//! ├── barrier      two-round startup handshake over sync channels
//! ├── shutdown     escalating SIGTERM/SIGKILL shutdown and reaping
//! ├── signals      SIGINT/SIGTERM capture into a quit token
//! └── pipeline     public entry point tying the phases together
//! ```
//!
//! # Startup protocol
//!
//! Forking N processes that share 3N pipes is a leak minefield: one write
//! end left open in the wrong child keeps a reader from ever seeing EOF.
//! Startup is therefore gated by a two-round barrier driven by the parent:
//!
//! 1. every child reports (one marker byte on its ready channel) that it
//!    has finished closing every descriptor that is not its own stdio or
//!    handshake pair — only then does the parent broadcast "go" by
//!    closing all release channels;
//! 2. the parent then learns each child's exec outcome: the ready
//!    channel's write end is close-on-exec, so EOF means the target
//!    program is running, while an explicit failure marker means exec
//!    could not be invoked. The first failure triggers shutdown of the
//!    whole ring and a terminal exit code of 127.
//!
//! # Usage
//!
//! ```no_run
//! use ring_pipe::Pipeline;
//! use std::ffi::OsString;
//!
//! let stages: Vec<Vec<OsString>> = vec![
//!     vec!["nc".into(), "-l".into(), "localhost".into(), "1234".into()],
//!     vec!["cat".into()],
//! ];
//! let code = Pipeline::new(stages).run()?;
//! std::process::exit(code);
//! # Ok::<(), ring_pipe::RingPipeError>(())
//! ```

mod barrier;
mod error;
mod launcher;
mod pipeline;
mod ring;
mod shutdown;
mod signals;

pub use error::{Result, RingPipeError};
pub use pipeline::Pipeline;

/// Process exit code when at least one stage failed to exec its program.
pub const EXIT_LAUNCH_FAILURE: i32 = 127;
