//! Shared setup for the tree integration tests.

use std::sync::Once;

use tracing_subscriber::{filter, fmt, EnvFilter};

static TRACING: Once = Once::new();

/// Log to the test output, WARN and up unless RUST_LOG says otherwise.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(filter::LevelFilter::WARN.into()),
            )
            .with_test_writer()
            .try_init();
    });
}
