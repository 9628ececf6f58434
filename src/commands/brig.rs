//! Brig command implementation.

use std::io::Write;

use super::write_lines;
use crate::config::Config;
use crate::error::Result;
use crate::resolver::find_recently_failing;

/// Prints the owners whose last run failed.
pub fn brig(config: &Config, out: &mut impl Write) -> Result<()> {
    write_lines(out, find_recently_failing(&config.root_dir, config))
}
