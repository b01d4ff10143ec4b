//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Default filter for the `-v`/`-q` flags
#[must_use]
pub const fn default_level(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    }
}

/// Log to stderr; `RUST_LOG` overrides the flags
pub fn initialize_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose, quiet)));
    // Already initialized elsewhere (tests); keep the existing subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
