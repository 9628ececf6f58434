//! Bilge command implementation.

use tracing::info;

use crate::config::Config;
use crate::error::Result;

/// Removes the store directory and everything recorded in it.
pub fn bilge(config: &Config) -> Result<()> {
    info!("Bilging out store at {}", config.root_dir.display());
    config.create_store().clean(&config.root_dir)?;
    info!("Store bilged successfully");
    Ok(())
}
