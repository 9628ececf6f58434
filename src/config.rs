//! Layered configuration.
//!
//! Settings are merged from, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `~/.muster.toml`
//! 3. `<working dir>/.muster.toml`
//! 4. an explicit `--config` file
//! 5. a packed option string (`force-all=true,selection-excludes=a::;b::`), the
//!    form instrumentation agents pass along on their command line
//!
//! Keys are kebab-case. Option strings also accept the dotted spelling
//! (`force.all=true`), which is translated to kebab-case.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{MusterError, Result};
use crate::hashing::{HASH_CACHE_FILE, HashAlgorithm, Hasher};
use crate::store::{Store, StoreFormat};

/// Name of the store directory created in the project directory.
pub const STORE_DIR_NAME: &str = ".muster";

/// Name of the configuration file looked up in the home and working
/// directories.
pub const CONFIG_FILE_NAME: &str = ".muster.toml";

/// Separator between packed options.
pub const OPTION_SEPARATOR: char = ',';

/// Separator between elements of list-valued packed options. Unit names are
/// Rust paths, so `:` cannot be used.
pub const LIST_SEPARATOR: char = ';';

const BOOL_KEYS: &[&str] = &[
    "dependencies-include-wellknown",
    "dependencies-append",
    "hash-semantic",
    "cache-seen-units",
    "hasher-cache",
    "force-all",
    "force-failing",
    "method-conflict-resolution",
];

const INT_KEYS: &[&str] = &["cache-size"];

const LIST_KEYS: &[&str] = &[
    "dependencies-wellknown",
    "selection-excludes",
    "selection-includes",
];

/// Substrings identifying shared test-framework resources. Dependencies on
/// them are not recorded unless `dependencies-include-wellknown` is set.
pub const DEFAULT_WELLKNOWN: &[&str] = &["/.cargo/registry/", "/.rustup/toolchains/"];

/// Configuration for collection, hashing, storage and selection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Directory holding dependency files. Relative paths are resolved
    /// against the working directory.
    pub root_dir: PathBuf,

    /// Wire format used when saving dependency sets.
    pub dependencies_format: StoreFormat,

    /// Record dependencies on well-known shared framework resources.
    pub dependencies_include_wellknown: bool,

    /// Substrings identifying well-known shared framework resources.
    pub dependencies_wellknown: Vec<String>,

    /// Union new dependencies with the previously stored ones and always
    /// rerun. Used to study non-deterministic dependency collection.
    pub dependencies_append: bool,

    /// Regular expression; matching references are never recorded.
    pub dependencies_ignored_paths: Option<String>,

    pub hash_algorithm: HashAlgorithm,

    /// Strip non-behavioral content before hashing.
    pub hash_semantic: bool,

    /// Capacity of the digest cache and of the decision memo.
    pub cache_size: usize,

    /// Keep the small lock-free cache of recently seen units in the collector.
    pub cache_seen_units: bool,

    /// Persist the digest cache in the store directory between processes.
    pub hasher_cache: bool,

    /// Treat every unit as affected.
    pub force_all: bool,

    /// Treat units whose last run failed as affected.
    pub force_failing: bool,

    /// Units whose full name starts with one of these prefixes always run.
    pub selection_excludes: Option<Vec<String>>,

    /// When set, only units whose full name starts with one of these prefixes
    /// are selected; every other unit always runs.
    pub selection_includes: Option<Vec<String>>,

    /// Experimental: downgrade conflicting affected method-level units in the
    /// batch resolver. Can hide a genuinely affected test.
    pub method_conflict_resolution: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(STORE_DIR_NAME),
            dependencies_format: StoreFormat::default(),
            dependencies_include_wellknown: false,
            dependencies_wellknown: DEFAULT_WELLKNOWN.iter().map(|s| s.to_string()).collect(),
            dependencies_append: false,
            dependencies_ignored_paths: None,
            hash_algorithm: HashAlgorithm::default(),
            hash_semantic: false,
            cache_size: 1000,
            cache_seen_units: true,
            hasher_cache: false,
            force_all: false,
            force_failing: false,
            selection_excludes: None,
            selection_includes: None,
            method_conflict_resolution: false,
        }
    }
}

impl Config {
    /// Loads configuration for `working_dir` using the default layering.
    pub fn load(working_dir: &Path) -> Result<Self> {
        ConfigLoader::new(working_dir).load()
    }

    /// Compiles the ignored-paths pattern, if any.
    pub fn ignored_paths_regex(&self) -> Result<Option<Regex>> {
        self.dependencies_ignored_paths
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| MusterError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Creates a store writing the configured format.
    pub fn create_store(&self) -> Store {
        Store::new(self.dependencies_format)
    }

    /// Creates a hasher with the configured algorithm, cache size and
    /// filtering. With `hasher-cache` set, the digest cache is restored from
    /// the store directory.
    pub fn create_hasher(&self) -> Hasher {
        let mut hasher = Hasher::new(self.hash_algorithm, self.cache_size);
        if self.hash_semantic {
            hasher = hasher.semantic();
        }
        if self.hasher_cache {
            hasher = hasher.with_durable_cache(self.root_dir.join(HASH_CACHE_FILE));
        }
        hasher
    }

    /// Returns a copy with `options` (packed `key=value` pairs) applied.
    pub fn with_options(&self, options: &str) -> Result<Self> {
        let mut table = self.to_table();
        table.extend(parse_options(options)?);
        from_table(table, None)
    }

    fn to_table(&self) -> toml::Table {
        let mut table = toml::Table::new();
        table.insert(
            "root-dir".into(),
            toml::Value::String(self.root_dir.to_string_lossy().into_owned()),
        );
        table.insert(
            "dependencies-format".into(),
            toml::Value::String(self.dependencies_format.as_str().into()),
        );
        table.insert(
            "dependencies-include-wellknown".into(),
            self.dependencies_include_wellknown.into(),
        );
        table.insert(
            "dependencies-wellknown".into(),
            string_array(&self.dependencies_wellknown),
        );
        table.insert("dependencies-append".into(), self.dependencies_append.into());
        if let Some(pattern) = &self.dependencies_ignored_paths {
            table.insert(
                "dependencies-ignored-paths".into(),
                toml::Value::String(pattern.clone()),
            );
        }
        table.insert(
            "hash-algorithm".into(),
            toml::Value::String(self.hash_algorithm.as_str().into()),
        );
        table.insert("hash-semantic".into(), self.hash_semantic.into());
        table.insert(
            "cache-size".into(),
            toml::Value::Integer(self.cache_size as i64),
        );
        table.insert("cache-seen-units".into(), self.cache_seen_units.into());
        table.insert("hasher-cache".into(), self.hasher_cache.into());
        table.insert("force-all".into(), self.force_all.into());
        table.insert("force-failing".into(), self.force_failing.into());
        if let Some(excludes) = &self.selection_excludes {
            table.insert("selection-excludes".into(), string_array(excludes));
        }
        if let Some(includes) = &self.selection_includes {
            table.insert("selection-includes".into(), string_array(includes));
        }
        table.insert(
            "method-conflict-resolution".into(),
            self.method_conflict_resolution.into(),
        );
        table
    }
}

/// Builder-style loader for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    working_dir: PathBuf,
    home_dir: Option<PathBuf>,
    config_file: Option<PathBuf>,
    options: Option<String>,
}

impl ConfigLoader {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            home_dir: home::home_dir(),
            config_file: None,
            options: None,
        }
    }

    /// Overrides the home directory searched for `.muster.toml` (`None`
    /// skips the home layer).
    pub fn home_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.home_dir = dir;
        self
    }

    /// Adds an explicit configuration file on top of the discovered ones.
    pub fn config_file(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.config_file = path.map(Into::into);
        self
    }

    /// Adds packed `key=value` options as the highest precedence layer.
    pub fn options(mut self, options: Option<impl Into<String>>) -> Self {
        self.options = options.map(Into::into);
        self
    }

    /// Merges all layers and resolves the store directory.
    pub fn load(&self) -> Result<Config> {
        let mut table = toml::Table::new();

        if let Some(home) = &self.home_dir {
            merge_file_if_exists(&mut table, &home.join(CONFIG_FILE_NAME))?;
        }
        merge_file_if_exists(&mut table, &self.working_dir.join(CONFIG_FILE_NAME))?;

        if let Some(path) = &self.config_file {
            let layer = read_table(path)?;
            debug!("Loaded configuration file {}", path.display());
            table.extend(layer);
        }

        if let Some(options) = &self.options {
            table.extend(parse_options(options)?);
        }

        let mut config = from_table(table, self.config_file.as_deref())?;
        if config.root_dir.is_relative() {
            config.root_dir = self.working_dir.join(&config.root_dir);
        }

        // Fail early on a bad pattern rather than at the first touch
        config.ignored_paths_regex()?;

        Ok(config)
    }
}

/// Parses a packed option string into a TOML table.
///
/// Options are separated by `,`; each one is `key=value`. List-valued keys
/// take `:`-separated elements.
pub fn parse_options(options: &str) -> Result<toml::Table> {
    let mut table = toml::Table::new();
    for option in options.split(OPTION_SEPARATOR) {
        let option = option.trim();
        if option.is_empty() {
            continue;
        }
        let Some((key, value)) = option.split_once('=') else {
            return Err(MusterError::InvalidOption {
                option: option.to_string(),
                message: "expected 'key=value'".to_string(),
            });
        };
        let key = key.trim().replace('.', "-");
        let value = value.trim();

        let parsed = if BOOL_KEYS.contains(&key.as_str()) {
            toml::Value::Boolean(value.parse::<bool>().map_err(|e| {
                MusterError::InvalidOption {
                    option: option.to_string(),
                    message: e.to_string(),
                }
            })?)
        } else if INT_KEYS.contains(&key.as_str()) {
            toml::Value::Integer(value.parse::<i64>().map_err(|e| {
                MusterError::InvalidOption {
                    option: option.to_string(),
                    message: e.to_string(),
                }
            })?)
        } else if LIST_KEYS.contains(&key.as_str()) {
            toml::Value::Array(
                value
                    .split(LIST_SEPARATOR)
                    .filter(|s| !s.is_empty())
                    .map(|s| toml::Value::String(s.to_string()))
                    .collect(),
            )
        } else {
            toml::Value::String(value.to_string())
        };
        table.insert(key, parsed);
    }
    Ok(table)
}

fn from_table(table: toml::Table, source: Option<&Path>) -> Result<Config> {
    Config::deserialize(toml::Value::Table(table)).map_err(|e| match source {
        Some(path) => MusterError::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
        None => MusterError::ConfigError {
            message: e.to_string(),
        },
    })
}

fn merge_file_if_exists(table: &mut toml::Table, path: &Path) -> Result<()> {
    if path.is_file() {
        table.extend(read_table(path)?);
        debug!("Loaded configuration file {}", path.display());
    }
    Ok(())
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = fs::read_to_string(path).map_err(|source| MusterError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .parse::<toml::Table>()
        .map_err(|e| MusterError::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn string_array(values: &[String]) -> toml::Value {
    toml::Value::Array(
        values
            .iter()
            .map(|s| toml::Value::String(s.clone()))
            .collect(),
    )
}
