//! Error types for cargo-muster.
//!
//! This module defines all error types used throughout cargo-muster, using
//! a combination of `thiserror` for ergonomic error definitions and `miette`
//! for rich diagnostic output.
//!
//! # Error Handling Strategy
//!
//! - All errors derive from [`MusterError`]
//! - Each variant includes helpful error messages and diagnostic codes
//! - Errors raised while *deciding* whether a unit is affected never reach the
//!   caller: the analyzer and the batch resolver log them and answer
//!   "affected", so the worst outcome of an internal failure is an extra rerun
//! - Errors are automatically converted to `miette::Result` for CLI output
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use cargo_muster::error::{MusterError, Result};
//!
//! fn check_store(path: &Path) -> Result<()> {
//!     if !path.is_dir() {
//!         return Err(MusterError::ConfigError {
//!             message: format!("'{}' is not a store directory", path.display()),
//!         });
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Error types that can occur in cargo-muster operations
#[derive(Error, Debug, Diagnostic)]
pub enum MusterError {
    /// File system I/O error during cargo-muster operations.
    ///
    /// Common causes: permission denied, disk full, or memory mapping
    /// failures. Used for store writes, marker files, hash cache persistence
    /// and configuration reads.
    #[error("I/O error accessing '{path}'")]
    #[diagnostic(code(cargo_muster::io_error))]
    IoError {
        /// The path that caused the I/O error
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A resource reference points at something that cannot be hashed.
    #[error("Invalid file type for '{path}': {message}")]
    #[diagnostic(code(cargo_muster::invalid_file_type))]
    InvalidFileType {
        /// The path with the invalid type
        path: PathBuf,
        /// Description of why the file type is invalid
        message: String,
    },

    /// Failed to create the store directory.
    ///
    /// Raised when `fs::create_dir_all()` fails while preparing to save a
    /// dependency set or a failure marker. The store usually lives at
    /// `.muster` in the project directory.
    #[error("Failed to create store directory '{0}'")]
    #[diagnostic(
        code(cargo_muster::store::create_dir_error),
        help("Ensure you have write permissions for the parent directory.")
    )]
    CreateStoreDirError(
        /// The directory path that couldn't be created
        PathBuf,
        /// The underlying I/O error
        #[source]
        std::io::Error,
    ),

    /// Every file name candidate for a unit key was rejected by the file
    /// system as too long.
    ///
    /// The store shortens overlong names twice by hashing; this is raised only
    /// when even the fully hashed name cannot be created.
    #[error("File name for unit '{name}' is too long for '{dir}'")]
    #[diagnostic(
        code(cargo_muster::store::name_too_long),
        help("Use a shorter store directory path or shorter test names.")
    )]
    NameTooLong {
        /// The store directory
        dir: PathBuf,
        /// The unit's full name
        name: String,
    },

    /// Failed to serialize the hash cache to rkyv format.
    #[error("Failed to serialize hash cache")]
    #[diagnostic(
        code(cargo_muster::hash_cache::serialization_error),
        help(
            "An internal error occurred while trying to save the hash cache. Try running 'cargo \
             muster bilge' to reset."
        )
    )]
    SerializationError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to deserialize the hash cache from rkyv format.
    ///
    /// Occurs when the cache file is corrupted or was written by an
    /// incompatible version. The cache is reset automatically.
    #[error("Failed to deserialize hash cache: {0}")]
    #[diagnostic(
        code(cargo_muster::hash_cache::deserialization_error),
        help("The hash cache may be corrupted. Run 'cargo muster bilge' to reset it.")
    )]
    DeserializationError(
        /// The underlying deserialization error
        #[source]
        rkyv::rancor::BoxedError,
    ),

    /// A configuration file could not be parsed.
    #[error("Invalid configuration in '{path}': {message}")]
    #[diagnostic(
        code(cargo_muster::config::invalid_file),
        help("Configuration files are TOML; see the crate documentation for accepted keys.")
    )]
    InvalidConfig {
        /// The configuration file
        path: PathBuf,
        /// Description of the problem
        message: String,
    },

    /// A packed `key=value` option could not be parsed.
    #[error("Incorrect option '{option}': {message}")]
    #[diagnostic(
        code(cargo_muster::config::invalid_option),
        help("Options are written as 'key=value' pairs separated by ','.")
    )]
    InvalidOption {
        /// The offending option text
        option: String,
        /// Description of the problem
        message: String,
    },

    /// The `ignored-paths` regular expression does not compile.
    #[error("Invalid ignored-paths pattern '{pattern}'")]
    #[diagnostic(code(cargo_muster::config::invalid_pattern))]
    InvalidPattern {
        /// The pattern as written in the configuration
        pattern: String,
        /// The regex compilation error
        #[source]
        source: regex::Error,
    },

    /// No dependency file is recorded for the requested unit.
    #[error("No dependencies recorded for unit '{unit}'")]
    #[diagnostic(
        code(cargo_muster::store::unknown_unit),
        help("Units are named '<owner>.<tag>', e.g. 'suite::tests.clz'. Run 'cargo muster muster --debug' to list recorded owners.")
    )]
    UnknownUnit {
        /// The unit name as given
        unit: String,
    },

    /// Configuration is inconsistent or a required parameter is missing.
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(cargo_muster::config::error),
        help("Check the required configuration parameters.")
    )]
    ConfigError {
        /// Description of the configuration error
        message: String,
    },
}

/// Type alias for Results in this crate
pub type Result<T> = std::result::Result<T, MusterError>;
