//! Tracing/logging setup shared by every process embedding the engine.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, LogSettings};

/// Initialize process-wide logging with JSON output and `RUST_LOG`
/// filtering (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(&LogSettings::default());
}

/// Initialize with explicit settings (e.g. from the engine config file).
pub fn init_with(settings: &LogSettings) {
    tracing::init(settings);
}

/// Route logs through the test harness's captured output.
pub fn init_for_tests() {
    tracing::init_test();
}
