//! Command-line interface definitions for cargo-muster.
//!
//! This module defines the CLI structure using clap, including all subcommands
//! and their arguments. The main entry point is the [`Cli`] struct.
//!
//! # Example
//!
//! ```no_run
//! use cargo_muster::cli::{Cli, Commands};
//!
//! // Parse command-line arguments
//! let cli = Cli::parse_args();
//!
//! // Access the parsed command
//! match &cli.command() {
//!     Commands::Muster { debug } => println!("Resolving (debug: {debug})"),
//!     Commands::Manifest { unit } => println!("Showing dependencies of {unit}"),
//!     _ => {}
//! }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

use crate::config::{Config, ConfigLoader};
use crate::error::{MusterError, Result};

#[cfg(test)]
mod tests;

/// Main command-line interface for cargo-muster.
///
/// This struct represents the top-level CLI configuration, containing both
/// global options that apply to all commands and the specific subcommand
/// to execute.
#[derive(Parser)]
#[command(
    name = "cargo-muster",
    bin_name = "cargo-muster",
    author,
    version,
    about = "Regression test selection: run only the tests whose dependencies changed",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    global_opts: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Global options that apply to all cargo-muster commands.
#[derive(Parser)]
pub struct GlobalOpts {
    /// Path to the store directory (defaults to the configured root-dir,
    /// ./.muster)
    #[arg(long, global = true, env = "CARGO_MUSTER_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Additional configuration file, applied on top of ~/.muster.toml and
    /// ./.muster.toml
    #[arg(long, global = true, env = "CARGO_MUSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Packed options, e.g. "force.all=true,selection.excludes=suite::slow;suite::io"
    #[arg(short, long, global = true, env = "CARGO_MUSTER_OPTIONS")]
    options: Option<String>,

    /// Enable verbose output (use multiple times for more verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, env = "CARGO_MUSTER_VERBOSE")]
    verbose: u8,

    /// Silence all output except for errors
    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        env = "CARGO_MUSTER_QUIET"
    )]
    quiet: bool,
}

impl GlobalOpts {
    /// Create a new builder for constructing `GlobalOpts` programmatically.
    pub fn builder() -> GlobalOptsBuilder {
        GlobalOptsBuilder::default()
    }

    /// Get the store directory override
    pub fn store_dir(&self) -> Option<&Path> {
        self.store_dir.as_deref()
    }

    /// Get the extra configuration file
    pub fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    /// Get the packed options
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Get the verbose level
    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Loads the layered configuration for `working_dir` and applies the
    /// command-line overrides.
    pub fn load_config(&self, working_dir: &Path) -> Result<Config> {
        let mut config = ConfigLoader::new(working_dir)
            .config_file(self.config())
            .options(self.options())
            .load()?;

        if let Some(store_dir) = self.store_dir() {
            config.root_dir = if store_dir.is_relative() {
                normalize_path(working_dir.join(store_dir))
            } else {
                normalize_path(store_dir)
            };
        }
        Ok(config)
    }
}

/// Builder for constructing `GlobalOpts` programmatically.
#[derive(Default)]
pub struct GlobalOptsBuilder {
    store_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    options: Option<String>,
    verbose: u8,
    quiet: bool,
}

impl GlobalOptsBuilder {
    /// Set the store directory path.
    pub fn store_dir(mut self, dir: Option<impl Into<PathBuf>>) -> Self {
        self.store_dir = dir.map(|d| d.into());
        self
    }

    /// Set the extra configuration file.
    pub fn config(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.config = path.map(|p| p.into());
        self
    }

    /// Set the packed options.
    pub fn options(mut self, options: Option<impl Into<String>>) -> Self {
        self.options = options.map(|o| o.into());
        self
    }

    /// Set the verbosity level (0 = normal, 1+ = verbose).
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    /// Enable or disable quiet mode.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Build the `GlobalOpts` instance with the configured values.
    pub fn build(self) -> GlobalOpts {
        GlobalOpts {
            store_dir: self.store_dir,
            config: self.config,
            options: self.options,
            verbose: self.verbose,
            quiet: self.quiet,
        }
    }
}

impl Cli {
    /// Get the global options
    pub fn global_opts(&self) -> &GlobalOpts {
        &self.global_opts
    }

    /// Get the command
    pub fn command(&self) -> &Commands {
        &self.command
    }

    /// Create a builder for programmatic construction
    pub fn builder() -> CliBuilder {
        CliBuilder::default()
    }
}

/// Builder for [`Cli`]
#[derive(Debug, Default)]
pub struct CliBuilder {
    store_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    options: Option<String>,
    verbose: u8,
    quiet: bool,
    command: Option<Commands>,
}

impl CliBuilder {
    /// Set the store directory
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Set the extra configuration file
    pub fn config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = Some(path.into());
        self
    }

    /// Set the packed options
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Set the verbose level
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    /// Enable quiet mode
    pub fn quiet(mut self, enabled: bool) -> Self {
        self.quiet = enabled;
        self
    }

    /// Set the command
    pub fn command(mut self, command: Commands) -> Self {
        self.command = Some(command);
        self
    }

    /// Build the Cli instance
    pub fn build(self) -> Result<Cli> {
        let command = self.command.ok_or(MusterError::ConfigError {
            message: "Command is required".to_string(),
        })?;

        Ok(Cli {
            global_opts: GlobalOpts::builder()
                .store_dir(self.store_dir)
                .config(self.config)
                .options(self.options)
                .verbose(self.verbose)
                .quiet(self.quiet)
                .build(),
            command,
        })
    }
}

/// Normalize a path to be absolute and clean, without requiring it to exist.
///
/// This function:
/// - Converts relative paths to absolute using the current directory
/// - Removes `.` and `..` components where possible
/// - Does NOT resolve symlinks (preserves user intent)
/// - Does NOT require the path to exist
fn normalize_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let absolute = if path.is_relative() {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    } else {
        path.to_path_buf()
    };

    let mut components = Vec::new();
    for component in absolute.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                if let Some(last) = components.last()
                    && !matches!(last, Component::ParentDir)
                {
                    components.pop();
                    continue;
                }
                components.push(component);
            }
            Component::CurDir => continue,
            _ => components.push(component),
        }
    }

    components.into_iter().collect()
}

/// Available cargo-muster subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Muster the crew: list test owners that do not need to run
    ///
    /// Checks every dependency file in the store against the current content
    /// of its dependencies, without running anything, and prints the owners
    /// whose recorded dependencies are all unchanged, one per line and
    /// sorted. Feed the list to your test runner as exclusions.
    Muster {
        /// Print both the affected and the non-affected owners
        #[arg(long, env = "CARGO_MUSTER_DEBUG")]
        debug: bool,
    },

    /// Visit the brig: list test owners whose last run failed
    Brig,

    /// Read the manifest of one unit
    ///
    /// Prints each recorded dependency of a unit with its recorded digest and
    /// whether it changed since. The unit is named like its dependency file,
    /// e.g. `suite::tests.clz`.
    Manifest {
        /// Unit file name, `<owner>.<tag>`
        unit: String,
    },

    /// Bilge out the store directory
    ///
    /// Removes all recorded dependencies and failure markers, so every test
    /// runs next time.
    Bilge,
}

/// Name cargo passes back as the first argument when it runs `cargo muster`.
const CARGO_SUBCOMMAND: &str = "muster";

impl Cli {
    /// Parse command line arguments, handling the cargo subcommand case
    pub fn parse_args() -> Self {
        Self::try_parse_cargo_args(std::env::args_os()).unwrap_or_else(|e| e.exit())
    }

    /// Parses `args`, dropping the subcommand name cargo inserts when invoked
    /// as `cargo muster`.
    ///
    /// `muster` is also a subcommand of its own, so the leading `muster` is
    /// only dropped when the remaining arguments still name a command. This
    /// keeps `cargo muster muster` and `cargo-muster muster` equivalent.
    pub fn try_parse_cargo_args<I, T>(args: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        if args.get(1).is_none_or(|arg| arg != CARGO_SUBCOMMAND) {
            return Self::try_parse_from(args);
        }

        let stripped: Vec<&OsString> = args.iter().take(1).chain(args.iter().skip(2)).collect();
        match Self::try_parse_from(stripped) {
            Ok(cli) => Ok(cli),
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                Err(e)
            }
            Err(stripped_err) => Self::try_parse_from(&args).map_err(|_| stripped_err),
        }
    }
}
