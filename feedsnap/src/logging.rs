//! Logging setup

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber filtered by `RUST_LOG`, defaulting to `info`
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with_default("info")
}

/// Install a `tracing` subscriber with a specific default filter
///
/// `RUST_LOG` still takes precedence when set.
pub fn init_logging_with_default(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
