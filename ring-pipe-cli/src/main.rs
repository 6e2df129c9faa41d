//! `ring-pipe` binary: parse, split, hand the ring to the library.
//!
//! Exit codes: 0 when the ring drained cleanly, 1 for usage and fatal
//! orchestrator errors, 127 when at least one stage failed to launch its
//! program. Fatal conditions print one stderr line prefixed with the
//! basename the binary was invoked as; diagnostics beyond that are
//! opt-in via `RUST_LOG`.

mod cli;

use clap::{CommandFactory, Parser};
use cli::Cli;
use ring_pipe::Pipeline;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    init_tracing();
    let program = program_name();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    // clap renders help and version to stdout on its
                    // own.
                    let _ = err.print();
                    return 0;
                }
                _ => {
                    // Usage errors get the same one-line basename
                    // prefix as every other fatal line.
                    let rendered = err.to_string();
                    let first = rendered.lines().next().unwrap_or("invalid usage");
                    let message = first.strip_prefix("error: ").unwrap_or(first);
                    eprintln!("{program}: ERROR: {message}");
                    eprintln!("{}", Cli::command().render_usage());
                    return 1;
                }
            }
        }
    };

    let groups = match cli::split_stages(&cli.stages, &cli.separator) {
        Ok(groups) => groups,
        Err(message) => {
            eprintln!("{program}: ERROR: {message}");
            eprintln!("{}", Cli::command().render_usage());
            return 1;
        }
    };

    tracing::debug!(stages = groups.len(), separator = %cli.separator, "starting ring");
    match Pipeline::new(groups).with_program_name(program.as_str()).run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{program}: ERROR: {err}");
            1
        }
    }
}

fn program_name() -> String {
    std::env::args_os()
        .next()
        .map(PathBuf::from)
        .and_then(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "ring-pipe".to_owned())
}

fn init_tracing() {
    // Stderr only: stdout may be someone's pipe one day, and the ring's
    // own payload must never be polluted.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
