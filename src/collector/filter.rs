use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::{Config, DEFAULT_WELLKNOWN, STORE_DIR_NAME};
use crate::error::Result;

/// Prefixes of temporary resources. Only meaningful on Unix.
const TEMP_PREFIXES: &[&str] = &["/tmp/", "file:/tmp/", "file:///tmp/"];

/// Decides which touched resources are not worth recording.
#[derive(Debug, Clone)]
pub struct RefFilter {
    ignore_temp: bool,
    ignored_paths: Option<Regex>,
    wellknown: Vec<String>,
    include_wellknown: bool,
    root_dir: Option<PathBuf>,
}

impl Default for RefFilter {
    fn default() -> Self {
        Self {
            ignore_temp: cfg!(unix),
            ignored_paths: None,
            wellknown: DEFAULT_WELLKNOWN.iter().map(|s| s.to_string()).collect(),
            include_wellknown: false,
            root_dir: None,
        }
    }
}

impl RefFilter {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            ignored_paths: config.ignored_paths_regex()?,
            wellknown: config.dependencies_wellknown.clone(),
            include_wellknown: config.dependencies_include_wellknown,
            root_dir: Some(config.root_dir.clone()),
            ..Self::default()
        })
    }

    /// Whether references under the temporary directory are dropped.
    pub fn ignore_temp(mut self, ignore: bool) -> Self {
        self.ignore_temp = ignore && cfg!(unix);
        self
    }

    pub fn ignored_paths(mut self, pattern: Option<Regex>) -> Self {
        self.ignored_paths = pattern;
        self
    }

    pub fn include_wellknown(mut self, include: bool) -> Self {
        self.include_wellknown = include;
        self
    }

    /// Returns `true` if a touched reference must not be recorded.
    pub fn is_ignorable(&self, reference: &str) -> bool {
        if self.ignore_temp && TEMP_PREFIXES.iter().any(|p| reference.starts_with(p)) {
            return true;
        }
        if self
            .ignored_paths
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(reference))
        {
            return true;
        }
        !self.include_wellknown && self.wellknown.iter().any(|w| reference.contains(w.as_str()))
    }

    /// Returns `true` if a directly read file must not be recorded: the
    /// store's own files and device files.
    pub fn is_ignorable_file(&self, path: &Path) -> bool {
        if self.root_dir.as_deref().is_some_and(|root| path.starts_with(root)) {
            return true;
        }
        if path.starts_with("/dev") {
            return true;
        }
        path.components()
            .any(|component| component.as_os_str() == STORE_DIR_NAME)
    }
}
