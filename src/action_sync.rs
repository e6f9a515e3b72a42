//! Per-peer action streams with in-order delivery.
//!
//! An [`ActionSynchronizer`] owns two streams:
//!
//! - the **local** stream: every recorded local action gets the next sequence id, is
//!   encoded and handed to the [`ActionOutbound`] (normally the [`Transport`]), and is
//!   queued for the game loop's own consumption;
//! - the **remote** stream: actions received from the peer, held until they are
//!   consecutive.
//!
//! Remote action `N + 1` is never handed out before `N`. If `N` was lost in transit, every
//! later action waits; nothing times out and nothing is skipped. The stall lasts until
//! `N` arrives, either on its own or because the peer answered a rebroadcast request.
//!
//! [`Transport`]: crate::Transport

use std::collections::{BTreeMap, VecDeque};

use smallvec::SmallVec;

use crate::network::codec;
use crate::report_violation_to;
use crate::sync::{Arc, Mutex};
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    next_sequence_id, sequence_precedes, NetplayError, PlayerAction, PlayerId, FIRST_SEQUENCE_ID,
};

/// Default number of sent local actions kept for rebroadcasts.
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;
/// Default number of actions a stream holds before it refuses (remote) or sheds (local) more.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// Where encoded local actions go.
pub trait ActionOutbound: Send + Sync {
    /// Hands one encoded datagram over for sending. Returns `false` if it was rejected.
    fn transmit(&self, datagram: Vec<u8>) -> bool;
}

/// The result of [`ActionSynchronizer::record_local_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "a local action that was not transmitted never reaches the peer"]
pub struct LocalRecord {
    /// The sequence id the action was assigned.
    pub sequence_id: u16,
    /// Whether the outbound accepted the datagram. `false` means the datagram was
    /// dropped (e.g. the transport was flooded); the action is still recorded.
    pub transmitted: bool,
}

/// What [`ActionSynchronizer::record_remote_action`] did with an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOutcome {
    /// Queued for in-order delivery.
    Accepted,
    /// An action with this sequence id is already waiting; the new one was ignored.
    Duplicate,
    /// The sequence id was already delivered; the action was ignored.
    Stale,
    /// Too many actions are waiting for a missing predecessor; the action was dropped.
    Overflow,
    /// Sequence id `0` or an action of the local player; the action was ignored.
    Invalid,
}

impl RemoteOutcome {
    /// Returns `true` only for [`RemoteOutcome::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Debug)]
struct LocalStream {
    counter: u16,
    pending: VecDeque<PlayerAction>,
    history: VecDeque<PlayerAction>,
}

impl LocalStream {
    fn new() -> Self {
        Self {
            counter: 0,
            pending: VecDeque::new(),
            history: VecDeque::new(),
        }
    }
}

#[derive(Debug)]
struct RemoteStream {
    expected: u16,
    pending: BTreeMap<u16, PlayerAction>,
}

impl RemoteStream {
    fn new() -> Self {
        Self {
            expected: FIRST_SEQUENCE_ID,
            pending: BTreeMap::new(),
        }
    }

    fn pop_expected(&mut self) -> Option<PlayerAction> {
        let action = self.pending.remove(&self.expected)?;
        self.expected = next_sequence_id(self.expected);
        Some(action)
    }
}

/// The action streams of one peer.
///
/// Every method takes `&self`: the remote stream is filled from the transport worker
/// while the game loop drains it, each stream behind its own lock.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use bubble_netplay::{ActionOutbound, ActionSynchronizer, PlayerAction, PlayerId};
///
/// struct Discard;
/// impl ActionOutbound for Discard {
///     fn transmit(&self, _datagram: Vec<u8>) -> bool {
///         true
///     }
/// }
///
/// let sync = ActionSynchronizer::new(PlayerId::One, Arc::new(Discard));
///
/// let mut action = PlayerAction::new(PlayerId::Two);
/// action.sequence_id = 2;
/// sync.record_remote_action(action);
/// assert!(sync.next_remote_action().is_none()); // 1 is missing
///
/// action.sequence_id = 1;
/// sync.record_remote_action(action);
/// assert_eq!(sync.next_remote_action().map(|a| a.sequence_id), Some(1));
/// assert_eq!(sync.next_remote_action().map(|a| a.sequence_id), Some(2));
/// ```
pub struct ActionSynchronizer {
    local_player: PlayerId,
    outbound: Arc<dyn ActionOutbound>,
    local: Mutex<LocalStream>,
    remote: Mutex<RemoteStream>,
    history_capacity: usize,
    stream_capacity: usize,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for ActionSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSynchronizer")
            .field("local_player", &self.local_player)
            .field("local_sequence", &self.local_sequence())
            .field("expected_remote_sequence", &self.expected_remote_sequence())
            .field("pending_remote", &self.pending_remote_len())
            .finish_non_exhaustive()
    }
}

impl ActionSynchronizer {
    /// Creates an initialized synchronizer for `local_player` that transmits through
    /// `outbound`.
    #[must_use]
    pub fn new(local_player: PlayerId, outbound: Arc<dyn ActionOutbound>) -> Self {
        Self {
            local_player,
            outbound,
            local: Mutex::new(LocalStream::new()),
            remote: Mutex::new(RemoteStream::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            observer: None,
        }
    }

    /// Sets how many sent local actions are kept for [`retransmit`](Self::retransmit).
    /// `0` keeps none.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets how many actions each stream holds. Clamped to at least 1.
    ///
    /// A full remote stream still takes the action it is waiting for.
    #[must_use]
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    /// Also reports violations to `observer`.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The player whose actions this synchronizer records locally.
    #[must_use]
    pub fn local_player(&self) -> PlayerId {
        self.local_player
    }

    /// Resets both streams: the local counter restarts so the next action gets id 1, the
    /// remote stream expects id 1 again, and everything queued is discarded.
    pub fn initialize(&self) {
        *self.local.lock() = LocalStream::new();
        *self.remote.lock() = RemoteStream::new();
        tracing::debug!(player = %self.local_player, "action streams initialized");
    }

    /// Assigns the next sequence id to `action`, queues it on the local stream and
    /// transmits it.
    ///
    /// `player_id` is overwritten with the local player. The call never blocks on
    /// delivery; a rejected transmission is reported in [`LocalRecord::transmitted`].
    ///
    /// # Errors
    ///
    /// [`NetplayError::SerializationError`] if the action cannot be encoded. Nothing is
    /// recorded in that case and the counter does not advance.
    pub fn record_local_action(&self, mut action: PlayerAction) -> Result<LocalRecord, NetplayError> {
        let datagram = {
            let mut local = self.local.lock();
            let sequence_id = next_sequence_id(local.counter);
            action.player_id = self.local_player;
            action.sequence_id = sequence_id;
            let datagram = codec::encode_action(&action)?;

            local.counter = sequence_id;
            if local.pending.len() >= self.stream_capacity {
                local.pending.pop_front();
                report_violation_to!(
                    &self.observer,
                    ViolationSeverity::Warning,
                    ViolationKind::ActionStream,
                    "local stream full ({} actions); oldest undrained action dropped",
                    self.stream_capacity
                );
            }
            local.pending.push_back(action);
            if self.history_capacity > 0 {
                if local.history.len() >= self.history_capacity {
                    local.history.pop_front();
                }
                local.history.push_back(action);
            }
            datagram
        };

        let transmitted = self.outbound.transmit(datagram);
        tracing::trace!(sequence_id = action.sequence_id, transmitted, "local action recorded");
        Ok(LocalRecord {
            sequence_id: action.sequence_id,
            transmitted,
        })
    }

    /// Queues an action received from the peer.
    ///
    /// Safe to call from the transport worker while the game loop drains the stream.
    pub fn record_remote_action(&self, action: PlayerAction) -> RemoteOutcome {
        if action.sequence_id == 0 || action.player_id == self.local_player {
            report_violation_to!(
                &self.observer,
                ViolationSeverity::Warning,
                ViolationKind::ActionStream,
                "ignored remote action {} of {}",
                action.sequence_id,
                action.player_id
            );
            return RemoteOutcome::Invalid;
        }

        let mut remote = self.remote.lock();
        let sequence_id = action.sequence_id;
        if sequence_precedes(sequence_id, remote.expected) {
            tracing::trace!(sequence_id, expected = remote.expected, "stale remote action dropped");
            return RemoteOutcome::Stale;
        }
        if remote.pending.contains_key(&sequence_id) {
            tracing::trace!(sequence_id, "duplicate remote action ignored");
            return RemoteOutcome::Duplicate;
        }
        // The expected id is always taken, or a full stream could never drain.
        if remote.pending.len() >= self.stream_capacity && sequence_id != remote.expected {
            let expected = remote.expected;
            drop(remote);
            report_violation_to!(
                &self.observer,
                ViolationSeverity::Error,
                ViolationKind::ActionStream,
                "remote stream full ({} actions waiting for {}); action {} dropped",
                self.stream_capacity,
                expected,
                sequence_id
            );
            return RemoteOutcome::Overflow;
        }
        remote.pending.insert(sequence_id, action);
        tracing::trace!(sequence_id, "remote action queued");
        RemoteOutcome::Accepted
    }

    /// Removes and returns the remote action with the expected sequence id, advancing the
    /// expectation by one. Returns `None` while that action has not arrived.
    pub fn next_remote_action(&self) -> Option<PlayerAction> {
        self.remote.lock().pop_expected()
    }

    /// Like [`next_remote_action`](Self::next_remote_action) without removing or advancing.
    #[must_use]
    pub fn peek_remote_action(&self) -> Option<PlayerAction> {
        let remote = self.remote.lock();
        remote.pending.get(&remote.expected).copied()
    }

    /// Removes every remote action that is ready, in order.
    pub fn drain_remote_ready(&self) -> SmallVec<[PlayerAction; 4]> {
        let mut remote = self.remote.lock();
        let mut ready = SmallVec::new();
        while let Some(action) = remote.pop_expected() {
            ready.push(action);
        }
        ready
    }

    /// Removes and returns the oldest undrained local action.
    pub fn next_local_action(&self) -> Option<PlayerAction> {
        self.local.lock().pending.pop_front()
    }

    /// Returns the oldest undrained local action without removing it.
    #[must_use]
    pub fn peek_local_action(&self) -> Option<PlayerAction> {
        self.local.lock().pending.front().copied()
    }

    /// The sequence id the next remote action must carry to be delivered.
    #[must_use]
    pub fn expected_remote_sequence(&self) -> u16 {
        self.remote.lock().expected
    }

    /// Number of remote actions waiting for delivery.
    #[must_use]
    pub fn pending_remote_len(&self) -> usize {
        self.remote.lock().pending.len()
    }

    /// The id of the last recorded local action, `0` if there is none.
    #[must_use]
    pub fn local_sequence(&self) -> u16 {
        self.local.lock().counter
    }

    /// The sequence id that blocks delivery: later actions are waiting but the expected
    /// one has not arrived.
    #[must_use]
    pub fn missing_remote_sequence(&self) -> Option<u16> {
        let remote = self.remote.lock();
        (!remote.pending.is_empty() && !remote.pending.contains_key(&remote.expected))
            .then_some(remote.expected)
    }

    /// A recently sent local action, if it is still in the history.
    #[must_use]
    pub fn history_action(&self, sequence_id: u16) -> Option<PlayerAction> {
        self.local
            .lock()
            .history
            .iter()
            .rev()
            .find(|action| action.sequence_id == sequence_id)
            .copied()
    }

    /// Transmits local action `sequence_id` again.
    ///
    /// Returns `None` if the action is not in the history, otherwise whether the outbound
    /// accepted it.
    pub fn retransmit(&self, sequence_id: u16) -> Option<bool> {
        let action = self.history_action(sequence_id)?;
        match codec::encode_action(&action) {
            Ok(datagram) => Some(self.outbound.transmit(datagram)),
            Err(err) => {
                report_violation_to!(
                    &self.observer,
                    ViolationSeverity::Error,
                    ViolationKind::Codec,
                    "cannot re-encode local action {}: {}",
                    sequence_id,
                    err
                );
                Some(false)
            },
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::telemetry::CollectingObserver;
    use crate::Message;

    #[derive(Default)]
    struct RecordingOutbound {
        datagrams: Mutex<Vec<Vec<u8>>>,
        reject: Mutex<bool>,
    }

    impl RecordingOutbound {
        fn sequence_ids(&self) -> Vec<u16> {
            self.datagrams
                .lock()
                .iter()
                .map(|bytes| match codec::decode(bytes).unwrap() {
                    Message::Action(action) => action.sequence_id,
                    other => panic!("unexpected message {other:?}"),
                })
                .collect()
        }
    }

    impl ActionOutbound for RecordingOutbound {
        fn transmit(&self, datagram: Vec<u8>) -> bool {
            if *self.reject.lock() {
                return false;
            }
            self.datagrams.lock().push(datagram);
            true
        }
    }

    fn synchronizer() -> (ActionSynchronizer, Arc<RecordingOutbound>) {
        let outbound = Arc::new(RecordingOutbound::default());
        let sync = ActionSynchronizer::new(PlayerId::One, outbound.clone());
        (sync, outbound)
    }

    fn remote(sequence_id: u16) -> PlayerAction {
        let mut action = PlayerAction::new(PlayerId::Two);
        action.sequence_id = sequence_id;
        action.aim_position = f64::from(sequence_id) / 10.0;
        action
    }

    fn delivered(sync: &ActionSynchronizer) -> Vec<u16> {
        std::iter::from_fn(|| sync.next_remote_action())
            .map(|a| a.sequence_id)
            .collect()
    }

    #[test]
    fn local_ids_start_at_one_without_gaps() {
        let (sync, outbound) = synchronizer();
        for expected in 1..=5 {
            let record = sync
                .record_local_action(PlayerAction::new(PlayerId::One))
                .unwrap();
            assert_eq!(record.sequence_id, expected);
            assert!(record.transmitted);
        }
        assert_eq!(sync.local_sequence(), 5);
        assert_eq!(outbound.sequence_ids(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn local_action_is_stamped_with_local_player() {
        let (sync, outbound) = synchronizer();
        let _ = sync
            .record_local_action(PlayerAction::new(PlayerId::Two))
            .unwrap();
        let bytes = outbound.datagrams.lock()[0].clone();
        match codec::decode(&bytes).unwrap() {
            Message::Action(action) => assert_eq!(action.player_id, PlayerId::One),
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(sync.next_local_action().unwrap().player_id, PlayerId::One);
    }

    #[test]
    fn rejected_transmission_still_records() {
        let (sync, outbound) = synchronizer();
        *outbound.reject.lock() = true;
        let record = sync
            .record_local_action(PlayerAction::new(PlayerId::One))
            .unwrap();
        assert_eq!(record.sequence_id, 1);
        assert!(!record.transmitted);
        assert_eq!(sync.peek_local_action().unwrap().sequence_id, 1);
        assert_eq!(sync.history_action(1).unwrap().sequence_id, 1);
    }

    #[test]
    fn local_actions_drain_in_order() {
        let (sync, _outbound) = synchronizer();
        for _ in 0..3 {
            let _ = sync
                .record_local_action(PlayerAction::new(PlayerId::One))
                .unwrap();
        }
        let drained: Vec<u16> = std::iter::from_fn(|| sync.next_local_action())
            .map(|a| a.sequence_id)
            .collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(sync.peek_local_action().is_none());
    }

    #[test]
    fn reordered_remote_actions_are_delivered_in_order() {
        let (sync, _outbound) = synchronizer();
        assert_eq!(sync.record_remote_action(remote(2)), RemoteOutcome::Accepted);
        assert!(sync.next_remote_action().is_none());
        assert_eq!(sync.record_remote_action(remote(1)), RemoteOutcome::Accepted);
        assert_eq!(sync.record_remote_action(remote(3)), RemoteOutcome::Accepted);
        assert_eq!(delivered(&sync), vec![1, 2, 3]);
        assert_eq!(sync.expected_remote_sequence(), 4);
    }

    #[test]
    fn lost_action_stalls_delivery() {
        let (sync, _outbound) = synchronizer();
        sync.record_remote_action(remote(1));
        sync.record_remote_action(remote(3));

        assert_eq!(sync.next_remote_action().unwrap().sequence_id, 1);
        for _ in 0..100 {
            assert!(sync.next_remote_action().is_none());
        }
        assert_eq!(sync.missing_remote_sequence(), Some(2));

        sync.record_remote_action(remote(2));
        assert_eq!(sync.missing_remote_sequence(), None);
        assert_eq!(delivered(&sync), vec![2, 3]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let (sync, _outbound) = synchronizer();
        assert_eq!(sync.record_remote_action(remote(2)), RemoteOutcome::Accepted);
        let mut altered = remote(2);
        altered.launch = true;
        assert_eq!(sync.record_remote_action(altered), RemoteOutcome::Duplicate);
        assert_eq!(sync.pending_remote_len(), 1);

        sync.record_remote_action(remote(1));
        let actions: Vec<PlayerAction> = std::iter::from_fn(|| sync.next_remote_action()).collect();
        assert_eq!(actions.len(), 2);
        // The first copy wins.
        assert!(!actions[1].launch);
    }

    #[test]
    fn delivered_actions_are_stale() {
        let (sync, _outbound) = synchronizer();
        sync.record_remote_action(remote(1));
        assert_eq!(delivered(&sync), vec![1]);
        assert_eq!(sync.record_remote_action(remote(1)), RemoteOutcome::Stale);
        assert_eq!(sync.pending_remote_len(), 0);
    }

    #[test]
    fn invalid_remote_actions_are_reported() {
        let observer = Arc::new(CollectingObserver::new());
        let sync = ActionSynchronizer::new(PlayerId::One, Arc::new(RecordingOutbound::default()))
            .with_violation_observer(observer.clone());

        assert_eq!(sync.record_remote_action(remote(0)), RemoteOutcome::Invalid);
        let mut echo = remote(1);
        echo.player_id = PlayerId::One;
        assert_eq!(sync.record_remote_action(echo), RemoteOutcome::Invalid);
        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::ActionStream));
    }

    #[test]
    fn remote_stream_overflow_drops_and_reports() {
        let observer = Arc::new(CollectingObserver::new());
        let sync = ActionSynchronizer::new(PlayerId::One, Arc::new(RecordingOutbound::default()))
            .with_stream_capacity(2)
            .with_violation_observer(observer.clone());

        assert!(sync.record_remote_action(remote(2)).is_accepted());
        assert!(sync.record_remote_action(remote(3)).is_accepted());
        assert_eq!(sync.record_remote_action(remote(4)), RemoteOutcome::Overflow);
        assert_eq!(sync.pending_remote_len(), 2);
        assert_eq!(observer.len(), 1);
    }

    #[test]
    fn full_remote_stream_still_takes_the_missing_action() {
        let observer = Arc::new(CollectingObserver::new());
        let sync = ActionSynchronizer::new(PlayerId::One, Arc::new(RecordingOutbound::default()))
            .with_stream_capacity(2)
            .with_violation_observer(observer.clone());

        assert!(sync.record_remote_action(remote(2)).is_accepted());
        assert!(sync.record_remote_action(remote(3)).is_accepted());
        assert_eq!(sync.record_remote_action(remote(1)), RemoteOutcome::Accepted);
        assert!(observer.is_empty());

        assert_eq!(delivered(&sync), vec![1, 2, 3]);
        assert_eq!(sync.pending_remote_len(), 0);

        assert!(sync.record_remote_action(remote(4)).is_accepted());
        assert_eq!(sync.next_remote_action().unwrap().sequence_id, 4);
    }

    #[test]
    fn default_capacity_stall_recovers_when_the_gap_fills() {
        let (sync, _outbound) = synchronizer();
        let last = DEFAULT_STREAM_CAPACITY as u16 + 1;
        for id in 2..=last {
            assert!(sync.record_remote_action(remote(id)).is_accepted());
        }
        assert_eq!(
            sync.record_remote_action(remote(last + 1)),
            RemoteOutcome::Overflow
        );
        assert!(sync.next_remote_action().is_none());

        assert!(sync.record_remote_action(remote(1)).is_accepted());
        assert_eq!(sync.drain_remote_ready().len(), last as usize);
        assert_eq!(sync.expected_remote_sequence(), last + 1);
    }

    #[test]
    fn peek_does_not_consume() {
        let (sync, _outbound) = synchronizer();
        assert!(sync.peek_remote_action().is_none());
        sync.record_remote_action(remote(1));
        assert_eq!(sync.peek_remote_action().unwrap().sequence_id, 1);
        assert_eq!(sync.peek_remote_action().unwrap().sequence_id, 1);
        assert_eq!(sync.expected_remote_sequence(), 1);
        assert_eq!(sync.next_remote_action().unwrap().sequence_id, 1);
        assert!(sync.peek_remote_action().is_none());
    }

    #[test]
    fn drain_returns_only_consecutive_actions() {
        let (sync, _outbound) = synchronizer();
        for id in [4, 2, 1, 6] {
            sync.record_remote_action(remote(id));
        }
        let ready: Vec<u16> = sync.drain_remote_ready().iter().map(|a| a.sequence_id).collect();
        assert_eq!(ready, vec![1, 2]);
        assert_eq!(sync.missing_remote_sequence(), Some(3));
        assert_eq!(sync.pending_remote_len(), 2);
    }

    #[test]
    fn initialize_resets_both_streams() {
        let (sync, _outbound) = synchronizer();
        let _ = sync
            .record_local_action(PlayerAction::new(PlayerId::One))
            .unwrap();
        sync.record_remote_action(remote(1));
        sync.record_remote_action(remote(5));
        assert_eq!(delivered(&sync), vec![1]);

        sync.initialize();
        assert_eq!(sync.local_sequence(), 0);
        assert_eq!(sync.expected_remote_sequence(), 1);
        assert_eq!(sync.pending_remote_len(), 0);
        assert!(sync.next_local_action().is_none());
        assert!(sync.history_action(1).is_none());

        let record = sync
            .record_local_action(PlayerAction::new(PlayerId::One))
            .unwrap();
        assert_eq!(record.sequence_id, 1);
        // Id 1 is deliverable again after a reset.
        assert!(sync.record_remote_action(remote(1)).is_accepted());
    }

    #[test]
    fn remote_sequence_wraps_past_zero() {
        let (sync, _outbound) = synchronizer();
        // Walk the expectation up to the end of the id space.
        {
            let mut stream = sync.remote.lock();
            stream.expected = u16::MAX - 1;
        }
        for id in [1, u16::MAX, u16::MAX - 1] {
            assert!(sync.record_remote_action(remote(id)).is_accepted());
        }
        assert_eq!(delivered(&sync), vec![u16::MAX - 1, u16::MAX, 1]);
        assert_eq!(sync.expected_remote_sequence(), 2);
        assert_eq!(sync.record_remote_action(remote(u16::MAX)), RemoteOutcome::Stale);
    }

    #[test]
    fn local_sequence_wraps_past_zero() {
        let (sync, _outbound) = synchronizer();
        sync.local.lock().counter = u16::MAX - 1;
        let ids: Vec<u16> = (0..3)
            .map(|_| {
                sync.record_local_action(PlayerAction::new(PlayerId::One))
                    .unwrap()
                    .sequence_id
            })
            .collect();
        assert_eq!(ids, vec![u16::MAX, 1, 2]);
    }

    #[test]
    fn history_is_bounded_and_retransmittable() {
        let outbound = Arc::new(RecordingOutbound::default());
        let sync =
            ActionSynchronizer::new(PlayerId::One, outbound.clone()).with_history_capacity(2);
        for _ in 0..3 {
            let _ = sync
                .record_local_action(PlayerAction::new(PlayerId::One))
                .unwrap();
        }
        assert!(sync.history_action(1).is_none());
        assert_eq!(sync.retransmit(1), None);
        assert_eq!(sync.retransmit(2), Some(true));
        assert_eq!(outbound.sequence_ids(), vec![1, 2, 3, 2]);
    }

    #[test]
    fn disabled_history_keeps_nothing() {
        let (sync, _outbound) = synchronizer();
        let sync = sync.with_history_capacity(0);
        let _ = sync
            .record_local_action(PlayerAction::new(PlayerId::One))
            .unwrap();
        assert_eq!(sync.retransmit(1), None);
    }

    #[test]
    fn concurrent_producer_and_consumer_see_every_action_in_order() {
        let (sync, _outbound) = synchronizer();
        let sync = Arc::new(sync);
        let producer = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || {
                // Deliver pairs swapped: 2,1,4,3,...
                for pair in (1..=200u16).step_by(2) {
                    sync.record_remote_action(remote(pair + 1));
                    sync.record_remote_action(remote(pair));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 200 {
            if let Some(action) = sync.next_remote_action() {
                seen.push(action.sequence_id);
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, (1..=200).collect::<Vec<u16>>());
    }
}
