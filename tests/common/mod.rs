//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `linked_socket`: an in-memory socket pair that can hold, reorder and drop datagrams
//! - `test_utils`: port allocation, polling helpers and session fixtures
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{linked_pair, wait_until};
//! ```

pub mod linked_socket;
pub mod test_utils;

// Re-export commonly used items for convenience.
// Each integration crate only uses a subset.
#[allow(unused_imports)]
pub use linked_socket::{linked_pair, LinkedSocket};
#[allow(unused_imports)]
pub use test_utils::{
    aim, init_tracing, record_and_flush, session_pair, session_pair_with, settle, wait_for,
    wait_until, PortAllocator, SessionPair, POLL_INTERVAL, WAIT_TIMEOUT,
};
