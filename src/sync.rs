//! Single import point for the synchronization primitives used across the crate.
//!
//! Import from this module instead of directly from `parking_lot` or `std::sync`:
//!
//! ```ignore
//! use crate::sync::{Arc, Condvar, Mutex};
//! ```
//!
//! `parking_lot` locks do not poison: a listener that panicked on the transport worker
//! leaves every lock usable.

pub(crate) use parking_lot::{Condvar, Mutex};
pub(crate) use std::sync::{Arc, Weak};
