//! Durable digest cache stored next to the dependency files.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::warn;

use super::CachedDigest;
use crate::error::{MusterError, Result};

/// File name of the durable digest cache inside the store directory.
pub const HASH_CACHE_FILE: &str = "hasher-cache.bin";

/// Current version of the digest cache format.
pub const HASH_CACHE_VERSION: u32 = 1;

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
struct HashCacheEntry {
    reference: String,
    digest: String,
    size: u64,
    mtime_nanos: u128,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
struct HashCache {
    version: u32,
    entries: Vec<HashCacheEntry>,
}

/// Loads cached digests from `path`.
///
/// Never fails: a missing file yields nothing, and a file that cannot be read
/// or was written by an incompatible version is discarded.
pub(crate) fn load_cache(path: &Path) -> Vec<(String, CachedDigest)> {
    match load_cache_inner(path) {
        Ok(entries) => entries,
        Err(MusterError::DeserializationError(e)) => {
            warn!("Discarding incompatible hash cache {}: {}", path.display(), e);
            if let Err(remove_err) = fs::remove_file(path) {
                warn!("Could not remove old hash cache: {remove_err}");
            }
            Vec::new()
        }
        Err(e) => {
            warn!("Ignoring unreadable hash cache: {e}");
            Vec::new()
        }
    }
}

fn load_cache_inner(path: &Path) -> Result<Vec<(String, CachedDigest)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).map_err(|source| MusterError::IoError {
        path: path.to_path_buf(),
        source,
    })?;

    let file_metadata = file.metadata().map_err(|source| MusterError::IoError {
        path: path.to_path_buf(),
        source,
    })?;

    if file_metadata.len() == 0 {
        return Ok(Vec::new());
    }

    let mmap = unsafe { Mmap::map(&file) }.map_err(|source| MusterError::IoError {
        path: path.to_path_buf(),
        source,
    })?;

    let cache = rkyv::from_bytes::<HashCache, rkyv::rancor::BoxedError>(&mmap[..])
        .map_err(MusterError::DeserializationError)?;

    if cache.version != HASH_CACHE_VERSION {
        warn!(
            "Hash cache version {} does not match {}, starting empty",
            cache.version, HASH_CACHE_VERSION
        );
        return Ok(Vec::new());
    }

    Ok(cache
        .entries
        .into_iter()
        .map(|entry| {
            (
                entry.reference,
                CachedDigest {
                    digest: entry.digest,
                    size: entry.size,
                    mtime_nanos: entry.mtime_nanos,
                },
            )
        })
        .collect())
}

/// Writes `entries` to `path` atomically.
pub(crate) fn save_cache(entries: &[(String, CachedDigest)], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| MusterError::CreateStoreDirError(parent.to_path_buf(), source))?;
    }

    let cache = HashCache {
        version: HASH_CACHE_VERSION,
        entries: entries
            .iter()
            .map(|(reference, entry)| HashCacheEntry {
                reference: reference.clone(),
                digest: entry.digest.clone(),
                size: entry.size,
                mtime_nanos: entry.mtime_nanos,
            })
            .collect(),
    };

    let bytes = rkyv::to_bytes::<rkyv::rancor::BoxedError>(&cache)
        .map_err(|e| MusterError::SerializationError(Box::new(e)))?;

    // Dot-prefixed so store listings never mistake it for a unit file
    let temp_path = path.with_file_name(format!(".{HASH_CACHE_FILE}.tmp"));

    let mut temp_file = File::create(&temp_path).map_err(|source| MusterError::IoError {
        path: temp_path.clone(),
        source,
    })?;

    temp_file
        .write_all(&bytes)
        .map_err(|source| MusterError::IoError {
            path: temp_path.clone(),
            source,
        })?;

    temp_file.sync_all().map_err(|source| MusterError::IoError {
        path: temp_path.clone(),
        source,
    })?;

    fs::rename(&temp_path, path).map_err(|source| MusterError::IoError {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
