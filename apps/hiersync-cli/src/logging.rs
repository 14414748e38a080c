//! Log setup.
//!
//! Logs go to stderr so stdout carries only the run report.

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count.
pub fn directive_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Build the filter: `RUST_LOG` wins unless `-v` was given.
pub fn env_filter(verbose: u8) -> EnvFilter {
    if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive_for(0)))
    } else {
        EnvFilter::new(directive_for(verbose))
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .try_init()
        .ok();
}
