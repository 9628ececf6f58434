//! Persisted dependency sets.
//!
//! One text file per coverage unit, named `<owner>.<tag>`, inside a store
//! directory. The first line is a format marker; every further line holds one
//! `<reference> _ <digest>` record. The prefix format factors out the part of
//! each reference before its last `/`, which is shared by most records of a
//! unit.
//!
//! Loading never fails: a missing, truncated or malformed file reads as an
//! empty set, which makes the unit affected.
//!
//! Failure markers live in the `test-results` subdirectory, one zero-byte file
//! per owner whose last run failed.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{MusterError, Result};
use crate::hashing::HASH_CACHE_FILE;
use crate::record::{DependencyRecord, DependencySet, UnitKey};


/// First line of a plain dependency file.
pub const PLAIN_MARKER: &str = "# 1";

/// First line of a prefix-compressed dependency file.
pub const PREFIX_MARKER: &str = "# 4";

/// Separates a reference from its digest.
pub const SEPARATOR: &str = " _ ";

/// Longest file name, in bytes, the store will try to create.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Subdirectory holding failure markers.
pub const TEST_RESULTS_DIR: &str = "test-results";

/// Files in the store directory that are not dependency files.
const TOOL_FILES: &[&str] = &[HASH_CACHE_FILE];

/// Wire format of dependency files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFormat {
    /// One full `<reference> _ <digest>` line per record.
    #[default]
    Plain,
    /// References grouped by the directory part shared with the previous
    /// record.
    Prefix,
}

impl StoreFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreFormat::Plain => "plain",
            StoreFormat::Prefix => "prefix",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            StoreFormat::Plain => PLAIN_MARKER,
            StoreFormat::Prefix => PREFIX_MARKER,
        }
    }

    fn from_marker(line: &str) -> Option<Self> {
        match line {
            PLAIN_MARKER => Some(StoreFormat::Plain),
            PREFIX_MARKER => Some(StoreFormat::Prefix),
            _ => None,
        }
    }

    /// Renders `set` in this format, marker line included.
    pub fn encode(&self, set: &DependencySet) -> String {
        let mut out = String::new();
        out.push_str(self.marker());
        out.push('\n');

        match self {
            StoreFormat::Plain => {
                for (reference, digest) in set {
                    push_record(&mut out, reference, digest);
                }
            }
            StoreFormat::Prefix => {
                let mut last_prefix: Option<&str> = None;
                for (reference, digest) in set {
                    let (prefix, suffix) = split_prefix(reference);
                    if last_prefix != Some(prefix) {
                        out.push_str(prefix);
                        out.push('\n');
                        last_prefix = Some(prefix);
                    }
                    push_record(&mut out, suffix, digest);
                }
            }
        }
        out
    }

    /// Parses file content in whichever format its marker names.
    ///
    /// Returns `None` for an unknown marker or a malformed record.
    pub fn decode(content: &str) -> Option<DependencySet> {
        let mut lines = content.lines();
        let format = Self::from_marker(lines.next()?)?;
        let mut set = DependencySet::new();

        match format {
            StoreFormat::Plain => {
                for line in lines {
                    let (reference, digest) = split_record(line)?;
                    set.insert(DependencyRecord::new(reference, digest));
                }
            }
            StoreFormat::Prefix => {
                let mut prefix = String::new();
                for line in lines {
                    match split_record(line) {
                        Some((suffix, digest)) => {
                            set.insert(DependencyRecord::new(format!("{prefix}{suffix}"), digest));
                        }
                        None => prefix = line.to_string(),
                    }
                }
            }
        }
        Some(set)
    }
}

fn push_record(out: &mut String, reference: &str, digest: &str) {
    out.push_str(reference);
    out.push_str(SEPARATOR);
    out.push_str(digest);
    out.push('\n');
}

/// Splits a reference before its last `/`; the suffix keeps the `/`.
fn split_prefix(reference: &str) -> (&str, &str) {
    match reference.rfind('/') {
        Some(index) => reference.split_at(index),
        None => ("", reference),
    }
}

fn split_record(line: &str) -> Option<(&str, &str)> {
    let index = line.rfind(SEPARATOR)?;
    let digest = &line[index + SEPARATOR.len()..];
    if digest.is_empty() {
        return None;
    }
    Some((&line[..index], digest))
}

/// File name candidates for `key`, in the order they are tried.
///
/// Names longer than [`MAX_FILE_NAME_LEN`] are skipped; the last candidate is
/// a fixed-width hash and always fits.
pub fn file_name_candidates(key: &UnitKey) -> Vec<String> {
    let full = key.full_name();
    let tag_hashed = format!("{}.{:016x}", key.owner(), xxh3_64(key.tag().as_bytes()));
    let fully_hashed = format!("{:016x}", xxh3_64(tag_hashed.as_bytes()));
    [full, tag_hashed, fully_hashed]
        .into_iter()
        .filter(|name| name.len() <= MAX_FILE_NAME_LEN)
        .collect()
}

fn marker_name(owner: &str) -> String {
    if owner.len() <= MAX_FILE_NAME_LEN && !owner.contains('/') {
        owner.to_string()
    } else {
        format!("{:016x}", xxh3_64(owner.as_bytes()))
    }
}

fn is_name_too_long(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::InvalidFilename
}

/// Reads and writes dependency files in a store directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct Store {
    format: StoreFormat,
}

impl Store {
    /// Creates a store that writes `format`. Both formats are always
    /// readable.
    pub fn new(format: StoreFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    /// Replaces the dependency file of `key` with `set`.
    pub fn save(&self, dir: &Path, key: &UnitKey, set: &DependencySet) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|source| MusterError::CreateStoreDirError(dir.to_path_buf(), source))?;

        let content = self.format.encode(set);
        for name in file_name_candidates(key) {
            match write_atomic(dir, &name, content.as_bytes()) {
                Ok(()) => {
                    debug!("Saved {} dependencies of {} to {}", set.len(), key, name);
                    return Ok(());
                }
                Err(e) if is_name_too_long(&e) => {
                    debug!("File name '{}' rejected as too long", name);
                }
                Err(source) => {
                    return Err(MusterError::IoError {
                        path: dir.join(&name),
                        source,
                    });
                }
            }
        }

        Err(MusterError::NameTooLong {
            dir: dir.to_path_buf(),
            name: key.full_name(),
        })
    }

    /// Loads the dependency set of `key`; empty if there is none.
    pub fn load(&self, dir: &Path, key: &UnitKey) -> DependencySet {
        match self.find(dir, key) {
            Some(path) => self.load_path(&path),
            None => DependencySet::new(),
        }
    }

    /// Returns the existing dependency file of `key`, if any.
    pub fn find(&self, dir: &Path, key: &UnitKey) -> Option<PathBuf> {
        file_name_candidates(key)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Loads a dependency file by path; empty if it is missing or malformed.
    pub fn load_path(&self, path: &Path) -> DependencySet {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Cannot read {}: {}", path.display(), e);
                }
                return DependencySet::new();
            }
        };

        StoreFormat::decode(&content).unwrap_or_else(|| {
            debug!("Ignoring malformed dependency file {}", path.display());
            DependencySet::new()
        })
    }

    /// Lists the dependency files in `dir`, sorted by name.
    ///
    /// Directories, dot-files and the store's own bookkeeping files are
    /// skipped. A missing directory has no files.
    pub fn list_unit_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| MusterError::IoError {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with('.') || TOOL_FILES.contains(&name) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    /// Creates (`failed`) or removes the failure marker of `key`'s owner.
    pub fn mark_failed(&self, dir: &Path, key: &UnitKey, failed: bool) -> Result<()> {
        let results_dir = dir.join(TEST_RESULTS_DIR);
        let marker = results_dir.join(marker_name(key.owner()));

        if failed {
            fs::create_dir_all(&results_dir)
                .map_err(|source| MusterError::CreateStoreDirError(results_dir.clone(), source))?;
            File::create(&marker).map_err(|source| MusterError::IoError {
                path: marker.clone(),
                source,
            })?;
        } else {
            match fs::remove_file(&marker) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(MusterError::IoError {
                        path: marker,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks whether the last run of `owner` failed.
    pub fn was_failing(&self, dir: &Path, owner: &str) -> bool {
        dir.join(TEST_RESULTS_DIR).join(marker_name(owner)).is_file()
    }

    /// Names of the markers in `dir`, sorted. Marker names are owner names
    /// unless the owner had to be hashed.
    pub fn recently_failing(&self, dir: &Path) -> Vec<String> {
        let results_dir = dir.join(TEST_RESULTS_DIR);
        if !results_dir.is_dir() {
            return Vec::new();
        }

        WalkDir::new(&results_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Cannot list {}: {}", results_dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect()
    }

    /// Removes the whole store directory.
    ///
    /// This function is idempotent - it succeeds even if the directory does
    /// not exist.
    pub fn clean(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            fs::remove_dir_all(dir).map_err(|source| MusterError::IoError {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Writes `bytes` to `dir/name` through a temporary file and a rename.
fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<()> {
    let temp_path = dir.join(format!(".{:016x}.tmp", xxh3_64(name.as_bytes())));
    let result = (|| {
        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(bytes)?;
        temp_file.sync_all()?;
        fs::rename(&temp_path, dir.join(name))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
