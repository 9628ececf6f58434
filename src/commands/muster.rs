//! Muster command implementation.

use std::io::Write;

use tracing::{info, warn};

use super::write_lines;
use crate::config::Config;
use crate::error::Result;
use crate::resolver::BatchResolver;

/// Prints the owners that do not need to run, one per line.
///
/// With `debug`, prints both lists under `AFFECTED:` and `NONAFFECTED:`
/// headings instead.
pub fn muster(config: &Config, debug: bool, out: &mut impl Write) -> Result<()> {
    let resolver = BatchResolver::from_config(config);
    let resolution = resolver.resolve(&config.root_dir);
    info!(
        "{} affected, {} non-affected",
        resolution.affected.len(),
        resolution.non_affected.len()
    );

    if debug {
        write_lines(out, ["AFFECTED:"])?;
        write_lines(out, &resolution.affected)?;
        write_lines(out, ["NONAFFECTED:"])?;
        write_lines(out, &resolution.non_affected)?;
    } else {
        write_lines(out, &resolution.non_affected)?;
    }

    if let Err(e) = resolver.hasher().flush() {
        warn!("Cannot save hash cache: {}", e);
    }
    Ok(())
}
