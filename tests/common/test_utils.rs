//! Shared test utilities for integration tests.
//!
//! # Port Allocation
//!
//! Tests that open real sockets must not share a port with a test running in another
//! process. Use `PortAllocator` to get unique ports:
//!
//! ```ignore
//! use common::test_utils::PortAllocator;
//!
//! let port = PortAllocator::next_port();
//! ```

#![allow(dead_code)] // Each integration crate only uses a subset of these helpers.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bubble_netplay::telemetry::CollectingObserver;
use bubble_netplay::{
    InMemoryPreferenceStore, NetplaySession, PlayerAction, PlayerId, Preferences, SessionBuilder,
};

use super::linked_socket::{linked_pair, LinkedSocket};

// ============================================================================
// Port Allocation System
// ============================================================================

/// Starting port for the atomic port allocator.
///
/// Above the registered service ports most CI machines use, below the ephemeral range.
const PORT_ALLOCATOR_START: u16 = 30000;

/// Ports allocated per test process.
const PORTS_PER_PROCESS: u16 = 20;

/// Per-binary counter, offset by the process id so that parallel test binaries get
/// disjoint ranges.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

static PORT_COUNTER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Thread-safe port allocator for integration tests.
pub struct PortAllocator;

impl PortAllocator {
    fn initialize_counter() {
        if PORT_COUNTER_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let pid = std::process::id();
            let max_offsets = (60000 - PORT_ALLOCATOR_START) / PORTS_PER_PROCESS;
            let offset_index = (pid % u32::from(max_offsets)) as u16;
            let start_port = PORT_ALLOCATOR_START + (offset_index * PORTS_PER_PROCESS);

            PORT_COUNTER.store(start_port, Ordering::SeqCst);
        }
    }

    /// Allocates the next available port.
    ///
    /// # Panics
    ///
    /// Panics if the allocator runs past port 60000.
    #[must_use]
    pub fn next_port() -> u16 {
        Self::initialize_counter();

        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        assert!(
            port < 60000,
            "Port allocator exhausted. This indicates a test suite issue."
        );
        port
    }
}

// ============================================================================
// Timing
// ============================================================================

/// How often `wait_until` re-checks its condition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How long `wait_until` waits before giving up.
///
/// Generous, because CI machines schedule worker threads late.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] passes. Returns whether it held.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Polls `producer` until it yields a value or [`WAIT_TIMEOUT`] passes.
pub fn wait_for<T>(mut producer: impl FnMut() -> Option<T>) -> Option<T> {
    let mut found = None;
    wait_until(|| {
        found = producer();
        found.is_some()
    });
    found
}

/// Gives the transport workers a moment to do things that must *not* happen.
pub fn settle() {
    thread::sleep(Duration::from_millis(50));
}

// ============================================================================
// Logging
// ============================================================================

/// Routes `tracing` output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ============================================================================
// Session Fixtures
// ============================================================================

/// Everything a two-peer test needs.
pub struct SessionPair {
    pub host: NetplaySession,
    pub guest: NetplaySession,
    /// The socket player one sends through.
    pub host_socket: Arc<LinkedSocket>,
    /// The socket player two sends through.
    pub guest_socket: Arc<LinkedSocket>,
    pub host_store: Arc<InMemoryPreferenceStore>,
    pub guest_store: Arc<InMemoryPreferenceStore>,
    pub observer: Arc<CollectingObserver>,
}

/// Starts player one with `host_prefs` and player two with `guest_prefs`, linked to each
/// other in memory.
pub fn session_pair_with(host_prefs: Preferences, guest_prefs: Preferences) -> SessionPair {
    init_tracing();
    let (host_socket, guest_socket) = linked_pair();
    let host_store = Arc::new(InMemoryPreferenceStore::with_preferences(host_prefs));
    let guest_store = Arc::new(InMemoryPreferenceStore::with_preferences(guest_prefs));
    let observer = Arc::new(CollectingObserver::new());

    let host = SessionBuilder::new(PlayerId::One)
        .with_preference_store(host_store.clone())
        .with_violation_observer(observer.clone())
        .with_socket(host_socket.clone())
        .start()
        .expect("host session should start");
    let guest = SessionBuilder::new(PlayerId::Two)
        .with_preference_store(guest_store.clone())
        .with_violation_observer(observer.clone())
        .with_socket(guest_socket.clone())
        .start()
        .expect("guest session should start");

    SessionPair {
        host,
        guest,
        host_socket,
        guest_socket,
        host_store,
        guest_store,
        observer,
    }
}

/// [`session_pair_with`] with default preferences on both sides.
pub fn session_pair() -> SessionPair {
    session_pair_with(Preferences::default(), Preferences::default())
}

/// Records `action` on `session` and waits until its transport handed the datagram to
/// `socket`. Returns the assigned sequence id.
///
/// # Panics
///
/// Panics if the session rejects the action or the datagram is not flushed in time.
pub fn record_and_flush(
    session: &NetplaySession,
    socket: &LinkedSocket,
    action: PlayerAction,
) -> u16 {
    let before = socket.sent().len();
    let record = session
        .record_local_action(action)
        .expect("recording a local action should succeed");
    assert!(record.transmitted, "transport was still busy");
    assert!(
        wait_until(|| socket.sent().len() > before),
        "action {} was never flushed",
        record.sequence_id
    );
    record.sequence_id
}

/// An aiming action of `player` at `position`.
pub fn aim(player: PlayerId, position: f64) -> PlayerAction {
    let mut action = PlayerAction::new(player);
    action.aim_position = position;
    action
}
