//! DOTS Client Harness
//!
//! Scripted transport doubles, PDU fixtures and a tracing initializer shared by
//! the runtime's tests.

pub mod fixtures;
pub mod mock_transport;

pub use mock_transport::{MockContext, MockSession, MockSessionProbe};

/// Install a test-friendly fmt subscriber; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
