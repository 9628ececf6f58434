//! Content hashing of resource references.
//!
//! A [`Hasher`] turns a resource reference into a digest string. Digests are
//! cached in a bounded LRU map keyed by reference; the cache can optionally be
//! made durable across processes (see [`Hasher::with_durable_cache`]).
//!
//! Hashing never fails: an unreadable resource yields [`ERR_DIGEST`], which
//! [`is_changed`] always reports as a change.

use std::borrow::Cow;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::UNIX_EPOCH;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{MusterError, Result};
use crate::lru::LruMap;

mod cache;

pub use cache::{HASH_CACHE_FILE, HASH_CACHE_VERSION};

/// Digest reported for resources that cannot be read.
pub const ERR_DIGEST: &str = "-1";

/// Files at least this large are hashed with BLAKE3's multi-threaded
/// implementation.
const PARALLEL_HASH_THRESHOLD: usize = 128 * 1024;

/// Returns `true` if a resource whose digest was `stored` must be considered
/// changed now that it hashes to `current`.
///
/// The error digest never matches anything, including itself.
pub fn is_changed(stored: &str, current: &str) -> bool {
    current == ERR_DIGEST || stored != current
}

/// Hash algorithm family used for digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// CRC-32 checksum rendered as a decimal number.
    #[default]
    Crc32,
    /// 64-bit XXH3 rendered as 16 hex digits.
    Xxh3,
    /// BLAKE3 rendered as 64 hex digits.
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Crc32 => "crc32",
            HashAlgorithm::Xxh3 => "xxh3",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Digests `bytes` with this algorithm.
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Crc32 => crc32fast::hash(bytes).to_string(),
            HashAlgorithm::Xxh3 => format!("{:016x}", xxhash_rust::xxh3::xxh3_64(bytes)),
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                if bytes.len() >= PARALLEL_HASH_THRESHOLD {
                    hasher.update_rayon(bytes);
                } else {
                    hasher.update(bytes);
                }
                hasher.finalize().to_hex().to_string()
            }
        }
    }
}

/// Strips content that cannot influence behavior before hashing.
pub trait ContentFilter: Send + Sync {
    fn filter<'a>(&self, bytes: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Normalizes UTF-8 text: line endings, trailing whitespace and blank lines
/// are dropped. Binary content passes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceNormalizer;

impl ContentFilter for WhitespaceNormalizer {
    fn filter<'a>(&self, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return Cow::Borrowed(bytes);
        };
        let mut normalized = String::with_capacity(text.len());
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            normalized.push_str(line);
            normalized.push('\n');
        }
        Cow::Owned(normalized.into_bytes())
    }
}

/// A cached digest together with the file attributes observed when it was
/// computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedDigest {
    pub digest: String,
    pub size: u64,
    pub mtime_nanos: u128,
}

/// Hashes resource references, caching digests by reference.
///
/// Within one process a cached digest is trusted without looking at the file
/// again. Digests restored from the durable cache are revalidated against the
/// file's size and modification time when loaded.
pub struct Hasher {
    algorithm: HashAlgorithm,
    filter: Option<Box<dyn ContentFilter>>,
    cache: Mutex<LruMap<String, CachedDigest>>,
    cache_file: Option<PathBuf>,
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher")
            .field("algorithm", &self.algorithm)
            .field("semantic", &self.filter.is_some())
            .field("cache_file", &self.cache_file)
            .finish_non_exhaustive()
    }
}

impl Hasher {
    /// Creates a hasher whose digest cache holds at most `cache_size`
    /// entries.
    pub fn new(algorithm: HashAlgorithm, cache_size: usize) -> Self {
        Self {
            algorithm,
            filter: None,
            cache: Mutex::new(LruMap::new(cache_size)),
            cache_file: None,
        }
    }

    /// Passes content through `filter` before hashing.
    pub fn with_filter(mut self, filter: impl ContentFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Enables semantic hashing with the default [`WhitespaceNormalizer`].
    pub fn semantic(self) -> Self {
        self.with_filter(WhitespaceNormalizer)
    }

    /// Restores the digest cache from `path` and remembers it for
    /// [`flush`](Hasher::flush).
    ///
    /// A missing or unreadable cache file starts an empty cache.
    pub fn with_durable_cache(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let restored = cache::load_cache(&path);
        {
            let cache = self.cache.get_mut().unwrap_or_else(PoisonError::into_inner);
            let mut kept = 0usize;
            for (reference, entry) in restored {
                if is_current(&reference, &entry) {
                    cache.insert(reference, entry);
                    kept += 1;
                }
            }
            debug!("Restored {} cached digests from {}", kept, path.display());
        }
        self.cache_file = Some(path);
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Whether content is filtered before hashing.
    pub fn is_semantic(&self) -> bool {
        self.filter.is_some()
    }

    /// Returns the digest of the resource `reference` points at, or
    /// [`ERR_DIGEST`] if it cannot be read.
    pub fn hash(&self, reference: &str) -> String {
        if let Some(entry) = self.lock_cache().get(reference) {
            return entry.digest.clone();
        }

        match self.compute(reference) {
            Ok(entry) => {
                let digest = entry.digest.clone();
                self.lock_cache().insert(reference.to_string(), entry);
                digest
            }
            Err(e) => {
                debug!("Cannot hash '{}': {}", reference, e);
                ERR_DIGEST.to_string()
            }
        }
    }

    /// Writes the digest cache back to its durable file, if one is configured.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.cache_file else {
            return Ok(());
        };
        let entries: Vec<(String, CachedDigest)> = self
            .lock_cache()
            .iter()
            .map(|(reference, entry)| (reference.clone(), entry.clone()))
            .collect();
        cache::save_cache(&entries, path)?;
        debug!("Saved {} cached digests to {}", entries.len(), path.display());
        Ok(())
    }

    /// Drops every cached digest.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruMap<String, CachedDigest>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn compute(&self, reference: &str) -> Result<CachedDigest> {
        let path = reference_path(reference);
        let (size, mtime_nanos) = file_attributes(&path)?;

        let digest = if size == 0 {
            self.digest_bytes(&[])
        } else {
            let file = File::open(&path).map_err(|source| MusterError::IoError {
                path: path.clone(),
                source,
            })?;
            let mmap = unsafe { Mmap::map(&file) }.map_err(|source| MusterError::IoError {
                path: path.clone(),
                source,
            })?;
            self.digest_bytes(&mmap)
        };
        trace!("{} -> {}", reference, digest);

        Ok(CachedDigest {
            digest,
            size,
            mtime_nanos,
        })
    }

    fn digest_bytes(&self, bytes: &[u8]) -> String {
        match &self.filter {
            Some(filter) => self.algorithm.digest(&filter.filter(bytes)),
            None => self.algorithm.digest(bytes),
        }
    }
}

/// Maps a resource reference to the file it names.
///
/// `file://` and `file:` URI prefixes are stripped; anything else is taken as
/// a path.
pub fn reference_path(reference: &str) -> PathBuf {
    let path = reference
        .strip_prefix("file://")
        .or_else(|| reference.strip_prefix("file:"))
        .unwrap_or(reference);
    PathBuf::from(path)
}

fn file_attributes(path: &Path) -> Result<(u64, u128)> {
    let metadata = fs::metadata(path).map_err(|source| MusterError::IoError {
        path: path.to_path_buf(),
        source,
    })?;

    if metadata.is_dir() {
        return Err(MusterError::InvalidFileType {
            path: path.to_path_buf(),
            message: "Directories are not supported".to_string(),
        });
    }

    let mtime_nanos = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();

    Ok((metadata.len(), mtime_nanos))
}

fn is_current(reference: &str, entry: &CachedDigest) -> bool {
    match file_attributes(&reference_path(reference)) {
        Ok((size, mtime_nanos)) => size == entry.size && mtime_nanos == entry.mtime_nanos,
        Err(_) => false,
    }
}
