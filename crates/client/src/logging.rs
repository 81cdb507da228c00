//! Logging setup.
//!
//! Library code logs through `tracing` directly; binaries call [`init`] once
//! to install a subscriber.

use tracing_subscriber::EnvFilter;

/// Default directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "captain_client=debug";

/// Install a formatting subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
