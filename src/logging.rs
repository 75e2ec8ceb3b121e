//! Logging setup for the `fmw` binary.
//!
//! Call `logging::init(verbose)` at the start of main(). Output goes to stderr
//! so command output on stdout stays clean.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn";
/// Filter used with `--verbose` when `RUST_LOG` is unset.
const VERBOSE_FILTER: &str = "warn,file_workspace=debug";

/// Build the filter from `RUST_LOG`, falling back to the default for `verbose`.
pub fn filter(verbose: bool) -> EnvFilter {
    match std::env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty()) {
        Some(val) => EnvFilter::new(val),
        None if verbose => EnvFilter::new(VERBOSE_FILTER),
        None => EnvFilter::new(DEFAULT_FILTER),
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbose: bool) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter(verbose))
        .with(console_layer)
        .try_init();
}
