//! Manifest command implementation.

use std::io::Write;

use super::write_lines;
use crate::config::Config;
use crate::error::{MusterError, Result};
use crate::hashing::is_changed;
use crate::record::UnitKey;

/// Prints every recorded dependency of `unit` as
/// `<changed|ok> <digest> <reference>`.
pub fn manifest(config: &Config, unit: &str, out: &mut impl Write) -> Result<()> {
    let unknown = || MusterError::UnknownUnit {
        unit: unit.to_string(),
    };
    let key = UnitKey::from_file_name(unit).ok_or_else(unknown)?;

    let store = config.create_store();
    let path = store.find(&config.root_dir, &key).ok_or_else(unknown)?;
    let set = store.load_path(&path);

    let hasher = config.create_hasher();
    let lines = set.iter().map(|(reference, digest)| {
        let status = if is_changed(digest, &hasher.hash(reference)) {
            "changed"
        } else {
            "ok"
        };
        format!("{status} {digest} {reference}")
    });
    write_lines(out, lines)
}
