//! Process-wide tracing setup shared by the portal binaries and tests.

pub mod tracing;

pub use crate::tracing::{LogFormat, LogSettings};

/// Initialize logging with JSON output and `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    crate::tracing::init(&LogSettings::default());
}
