//! # cargo-muster
//!
//! Regression test selection for Rust test suites: record which files each
//! test unit read, and skip the units whose recorded files did not change
//! since their last run.
//!
//! ## Overview
//!
//! A *test unit* (a whole run, a test module, or a single test) is bracketed
//! by a dependency interval. While the interval is open, every resource the
//! unit touches is reported to a [`collector::Collector`]. When it closes,
//! the references are hashed and stored as a *dependency set* in the store
//! directory (`.muster` by default). Next time, the unit is *affected* only if
//! the current digest of some recorded reference differs from the stored one.
//!
//! ## Architecture
//!
//! - [`record`]: unit keys and dependency sets
//! - [`hashing`]: content digests with an LRU cache, optionally persisted
//! - [`store`]: the on-disk dependency file format and failure markers
//! - [`collector`]: lock-free, exactly-once dependency collection
//! - [`analyzer`]: the per-unit interval protocol and selection policy
//! - [`resolver`]: offline selection over a whole store directory
//! - [`config`]: layered TOML configuration and packed `key=value` options
//! - [`cli`] and [`commands`]: the `cargo muster` front end
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cargo_muster::analyzer::DependencyAnalyzer;
//! use cargo_muster::collector::{Collector, UnitTable};
//! use cargo_muster::config::Config;
//! use cargo_muster::record::UnitKey;
//!
//! let config = Config::load(std::path::Path::new("."))?;
//! let units = Arc::new(UnitTable::new());
//! let collector = Arc::new(Collector::from_config(&config, units.clone())?);
//! let mut analyzer = DependencyAnalyzer::from_config(&config, collector.clone());
//!
//! let key = UnitKey::class("my_crate::tests");
//! if analyzer.interval_begin(&key) {
//!     if let Some(fixture) = units.register("tests/data/fixture.json") {
//!         collector.touch(fixture, 0);
//!     }
//!     // ... run the tests ...
//!     analyzer.interval_end(&key, false);
//! }
//! analyzer.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! The crate uses a combination of:
//! - `thiserror` for strongly-typed errors
//! - `miette` for rich diagnostic output in CLI
//!
//! The selection path itself is fail-open: unreadable store files load as
//! empty and unreadable resources hash to an error digest, so a unit runs
//! rather than being skipped on bad data.

pub mod analyzer;
pub mod cli;
pub mod collector;
pub mod commands;
pub mod config;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod lru;
pub mod record;
pub mod resolver;
pub mod store;
