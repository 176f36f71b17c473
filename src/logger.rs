//! Logging setup: `RUST_LOG` drives the `tracing` filter if set, otherwise
//! the level passed on the command line is used as the default.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. Safe to call more than
/// once in tests; later calls are ignored.
pub fn init(level: &str) {
    let builder = tracing_subscriber::fmt().with_target(true);

    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).try_init(),
        Err(_) => builder.with_env_filter(level).try_init(),
    };

    // A second init in the same process (e.g. across #[tokio::test]s) is
    // expected to fail; anything else would be a real misconfiguration.
    if let Err(e) = result {
        if !e.to_string().contains("already") {
            eprintln!("failed to initialise logging: {e}");
        }
    }
}
