//! Implementation of cargo-muster subcommands.
//!
//! `mod.rs` is a thin dispatcher; each command lives in its own module and
//! writes its report to the given output, leaving stderr to the log.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::error::{MusterError, Result};

pub(crate) mod bilge;
pub(crate) mod brig;
pub(crate) mod manifest;
pub(crate) mod muster;

pub use bilge::bilge;
pub use brig::brig;
pub use manifest::manifest;
pub use muster::muster;


/// Execute commands based on the parsed CLI arguments.
pub fn execute(cli: &Cli) -> Result<()> {
    execute_with_dir(cli, None)
}

/// Execute commands with an explicit working directory.
pub fn execute_with_dir(cli: &Cli, working_dir: Option<&Path>) -> Result<()> {
    let stdout = io::stdout();
    execute_to(cli, working_dir, &mut stdout.lock())
}

/// Execute commands, writing reports to `out`.
pub fn execute_to(cli: &Cli, working_dir: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let current_dir = if let Some(dir) = working_dir {
        dir.to_path_buf()
    } else {
        std::env::current_dir().map_err(|source| MusterError::IoError {
            path: PathBuf::from("."),
            source,
        })?
    };

    let config = cli.global_opts().load_config(&current_dir)?;
    debug!("Using store directory {}", config.root_dir.display());

    match cli.command() {
        Commands::Muster { debug } => muster(&config, *debug, out),
        Commands::Brig => brig(&config, out),
        Commands::Manifest { unit } => manifest(&config, unit, out),
        Commands::Bilge => bilge(&config),
    }
}

/// Writes one line per item, mapping write failures to [`MusterError`].
pub(crate) fn write_lines<I, S>(out: &mut impl Write, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let result = (|| {
        for line in lines {
            writeln!(out, "{}", line.as_ref())?;
        }
        out.flush()
    })();
    result.map_err(|source| MusterError::IoError {
        path: PathBuf::from("<stdout>"),
        source,
    })
}
