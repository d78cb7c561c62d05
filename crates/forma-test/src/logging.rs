//! Test logging
//!
//! Routes `tracing` output through the test harness writer so it is only
//! shown for failing tests. Filter with `RUST_LOG`, e.g.
//! `RUST_LOG=forma_controls=trace`.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a test subscriber once per process. Later calls are no-ops.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let installed = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("test logging installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
