//! # cargo-muster CLI
//!
//! The command-line interface for cargo-muster, which decides before a test
//! run which test owners can be skipped because nothing they depend on
//! changed.
//!
//! ## Commands
//!
//! - **muster**: Lists the owners that do not need to run
//! - **brig**: Lists the owners whose last run failed
//! - **manifest**: Shows the recorded dependencies of one unit
//! - **bilge**: Clears the store for a fresh start
//!
//! ## Quick Start
//!
//! ```bash
//! # Owners whose dependencies are unchanged
//! cargo muster muster
//!
//! # Both lists, with the analysis logged
//! cargo muster -v muster --debug
//! ```
//!
//! ## Environment Variables
//!
//! - `CARGO_MUSTER_STORE_DIR`: Override the store directory (default: ./.muster)
//! - `CARGO_MUSTER_CONFIG`: Extra configuration file
//! - `CARGO_MUSTER_OPTIONS`: Packed `key=value` options
//! - `CARGO_MUSTER_VERBOSE`: Enable verbose output
//! - `CARGO_MUSTER_QUIET`: Silence all output except errors
//! - `RUST_LOG`: Overrides the log filter derived from the flags

use std::io::IsTerminal;

use cargo_muster::cli::Cli;

fn main() -> miette::Result<()> {
    miette::set_panic_hook();

    if std::io::stderr().is_terminal() {
        miette::set_hook(Box::new(|_| {
            Box::new(
                miette::GraphicalReportHandler::new()
                    .with_theme(miette::GraphicalTheme::unicode_nocolor())
                    .with_context_lines(3),
            )
        }))?;
    } else {
        // CI logs get plain text
        miette::set_hook(Box::new(|_| {
            Box::new(
                miette::GraphicalReportHandler::new()
                    .with_theme(miette::GraphicalTheme::none())
                    .with_context_lines(0),
            )
        }))?;
    }

    let cli = Cli::parse_args();
    cargo_muster::logging::init(cli.global_opts().verbose(), cli.global_opts().quiet());

    cargo_muster::commands::execute(&cli).map_err(Into::into)
}
