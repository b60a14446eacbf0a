//! Tracing and logging setup shared by forgepress binaries and tests.

/// Initialize process-wide logging with the default configuration.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::{LogFormat, ObservabilityConfig, ObservabilityError, init_for_tests, init_with};
