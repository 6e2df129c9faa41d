//! Argument grammar and stage splitting.
//!
//! Everything after the options is one flat token stream; stages are
//! carved out of it by splitting on the separator token (default `--`).
//! Option parsing stops at the first non-option argument or at the first
//! literal `--`, whichever comes first — so a separator placed before
//! the very first command must be the literal `--` even when a custom
//! separator is configured. The help text spells this out, since it
//! regularly surprises people.

use clap::Parser;
use std::ffi::{OsStr, OsString};

pub const DEFAULT_SEPARATOR: &str = "--";

const AFTER_HELP: &str = "\
Remarks:
  When a separator is placed immediately before the first command it must be
  the literal '--' and not the token configured with --separator or -s:
  option parsing consumes the first '--' before stage splitting ever runs.

Examples:
  ring-pipe nc -l localhost 1234
  ring-pipe /bin/sh -c 'exec /bin/sh -i 2>&1' -- nc -l localhost 1234
  ring-pipe -s +++ -- nc -l localhost 1234 +++ cat +++ tr a-z A-Z";

#[derive(Parser, Debug)]
#[command(
    name = "ring-pipe",
    version,
    about = "Run commands with their stdio joined into a closed ring of pipes",
    long_about = "Launches each command with its standard output piped into the next \
command's standard input, and the last command's output piped back into the \
first: a shell pipeline bent into a ring. Useful for wiring a network \
listener and a chain of filters into a loop without named FIFOs.",
    after_help = AFTER_HELP
)]
pub struct Cli {
    /// Token separating one stage's command line from the next
    #[arg(short, long, value_name = "STR", default_value = DEFAULT_SEPARATOR)]
    pub separator: String,

    /// Stage command lines, separated by the separator token
    #[arg(
        value_name = "CMD",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub stages: Vec<OsString>,
}

/// Split the flat token stream into per-stage argument vectors.
///
/// Every stage must end up non-empty: adjacent separators, a leading
/// separator token, or a trailing one are usage errors, not empty
/// stages.
pub fn split_stages(
    args: &[OsString],
    separator: &str,
) -> Result<Vec<Vec<OsString>>, String> {
    let sep = OsStr::new(separator);
    let mut groups: Vec<Vec<OsString>> = Vec::new();
    let mut current: Vec<OsString> = Vec::new();
    for arg in args {
        if arg.as_os_str() == sep {
            groups.push(std::mem::take(&mut current));
        } else {
            current.push(arg.clone());
        }
    }
    groups.push(current);
    for (index, group) in groups.iter().enumerate() {
        if group.is_empty() {
            return Err(format!(
                "stage {index} is empty (separator '{separator}' with no command)"
            ));
        }
    }
    Ok(groups)
}
