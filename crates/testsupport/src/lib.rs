//! Test support utilities for the replicated key/value workspace.
//!
//! This crate provides:
//! - A scriptable consensus layer whose leadership and deliveries a test controls
//! - Single-node replica fixtures and a serial-numbering test client
//! - Property-based test generators for operations
//! - Assertion helpers for replies
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use testsupport::prelude::*;
//!
//! #[tokio::test]
//! async fn put_then_get() {
//!     let node = single_node();
//!     let mut client = TestClient::new(1);
//!     client.put(&node.server, "x", "1").await.unwrap();
//!     assert_value(&node.server, &mut client, "x", "1").await;
//! }
//! ```

pub mod assertions;
pub mod consensus;
pub mod fixtures;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::consensus::*;
    pub use crate::fixtures::*;
}
