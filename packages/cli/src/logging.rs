// ABOUTME: Tracing subscriber setup for the shipyard binary
// ABOUTME: Honours RUST_LOG and otherwise logs shipyard crates at info

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "warn,shipyard=info";

/// Install the global subscriber. Logs go to stderr so stdout stays readable.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,shipyard=debug")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
