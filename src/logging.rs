//! Logging setup for the `streamzip` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is up
//! to the application. `RUST_LOG` takes precedence over the defaults:
//!
//! ```bash
//! RUST_LOG=streamzip=trace streamzip -l archive.zip
//! ```

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a compact stderr subscriber.
///
/// Defaults to `info` for this crate, or `debug` when `debug` is set.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("streamzip=debug")
        } else {
            EnvFilter::new("streamzip=info")
        }
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(debug)
            .without_time()
            .compact(),
    );

    // a subscriber may already be installed (tests, embedding apps)
    let _ = tracing::subscriber::set_global_default(subscriber);
}
