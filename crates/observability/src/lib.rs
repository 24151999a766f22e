//! Process-wide logging setup shared by every clinicflow binary.

/// Initialize structured logging from the environment.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, LogFormatError};
