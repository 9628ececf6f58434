use tracing_subscriber::EnvFilter;

/// Maps the `-v`/`-q` flags to a filter directive for this crate.
pub fn filter_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "cargo_muster=error";
    }
    match verbose {
        0 => "cargo_muster=warn",
        1 => "cargo_muster=info",
        2 => "cargo_muster=debug",
        _ => "cargo_muster=trace",
    }
}

/// Installs the stderr log subscriber. `RUST_LOG`, when set, takes precedence
/// over the flags.
///
/// Calling this more than once keeps the first subscriber.
pub fn init(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbose, quiet)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}
