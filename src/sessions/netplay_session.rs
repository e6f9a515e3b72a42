//! The session: transport, codec and synchronizer wired together.
//!
//! Received datagrams are decoded on the transport worker and dispatched:
//!
//! | Message        | Effect                                                              |
//! |----------------|---------------------------------------------------------------------|
//! | `ACTION`       | queued on the remote stream                                         |
//! | `SET_PREFS`    | adopted by player two (saved to the store), ignored by player one   |
//! | `JOIN_GAME`    | [`SessionEvent::PeerJoined`]; player one answers with `SET_PREFS`   |
//! | `START_GAME`   | [`SessionEvent::PeerStarted`]                                       |
//! | `REBROADCAST`  | the requested local action is sent again                            |
//! | `GAME_FIELD`   | kept as the latest remote snapshot                                  |
//!
//! Messages carrying the local player id are our own multicast echo and are ignored.

use std::collections::VecDeque;

use crate::action_sync::{ActionSynchronizer, LocalRecord};
use crate::network::codec;
use crate::network::transport::{Transport, TransportEvent, TransportListener};
use crate::report_violation_to;
use crate::sessions::config::SessionConfig;
use crate::sessions::event_drain::EventDrain;
use crate::sessions::preferences::PreferenceStore;
use crate::sync::{Arc, Mutex, Weak};
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    DatagramSocket, GameFieldData, JoinGame, Message, NetplayError, PlayerAction, PlayerId,
    Preferences, RebroadcastRequest, StartGame, TransportStats,
};

/// Something that happened in a session, drained with [`NetplaySession::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The peer sent `JOIN_GAME`.
    PeerJoined {
        /// The joining player.
        player: PlayerId,
    },
    /// The peer sent `START_GAME`.
    PeerStarted {
        /// The player that is ready.
        player: PlayerId,
    },
    /// Player one's preferences were adopted and saved to the store.
    PreferencesAdopted,
    /// The peer asked for one of our actions again.
    RebroadcastRequested {
        /// The requested local action.
        sequence_id: u16,
        /// Whether the action was still in the history and was staged for sending.
        resent: bool,
    },
    /// A new snapshot of the peer's board is available through
    /// [`NetplaySession::take_remote_game_field`].
    GameFieldReceived {
        /// The player whose board it is.
        player: PlayerId,
    },
    /// A transport event other than a received datagram.
    Transport(TransportEvent),
}

/// Lifecycle state of a [`NetplaySession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// The transport is sending and receiving.
    Running,
    /// The transport is parked; local actions are still recorded and staged.
    Paused,
    /// The session is over. Every operation that would send fails.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct PreferenceState {
    local: Preferences,
    active: Preferences,
}

struct SessionShared {
    local_player: PlayerId,
    config: SessionConfig,
    transport: Arc<Transport>,
    synchronizer: ActionSynchronizer,
    preferences: Mutex<PreferenceState>,
    store: Arc<dyn PreferenceStore>,
    events: Mutex<VecDeque<SessionEvent>>,
    remote_field: Mutex<Option<GameFieldData>>,
    state: Mutex<SessionState>,
    observer: Option<Arc<dyn ViolationObserver>>,
}

/// Routes transport events into the session without keeping it alive.
struct Dispatcher {
    session: Weak<SessionShared>,
}

impl TransportListener for Dispatcher {
    fn on_event(&self, event: TransportEvent) {
        if let Some(session) = self.session.upgrade() {
            session.dispatch(event);
        }
    }
}

impl SessionShared {
    fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::PacketReceived(bytes) => self.handle_datagram(&bytes),
            other => self.push_event(SessionEvent::Transport(other)),
        }
    }

    fn handle_datagram(&self, bytes: &[u8]) {
        let message = match codec::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                report_violation_to!(
                    &self.observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Codec,
                    "dropped undecodable datagram of {} bytes: {}",
                    bytes.len(),
                    err
                );
                return;
            },
        };

        if message.sender() == Some(self.local_player) {
            tracing::trace!(message_type = ?message.message_type(), "own echo ignored");
            return;
        }

        match message {
            Message::Action(action) => {
                let outcome = self.synchronizer.record_remote_action(action);
                tracing::trace!(sequence_id = action.sequence_id, ?outcome, "remote action");
            },
            Message::SetPrefs(preferences) => {
                if self.local_player.is_host() {
                    tracing::debug!("preferences from the peer ignored by the host");
                } else {
                    self.adopt_preferences(preferences);
                }
            },
            Message::JoinGame(JoinGame { player_id }) => {
                tracing::debug!(player = %player_id, "peer joined");
                self.push_event(SessionEvent::PeerJoined { player: player_id });
                if self.local_player.is_host() {
                    let local = self.preferences.lock().local;
                    if let Err(err) = self.send(&Message::SetPrefs(local)) {
                        report_violation_to!(
                            &self.observer,
                            ViolationSeverity::Warning,
                            ViolationKind::Session,
                            "cannot answer join with preferences: {}",
                            err
                        );
                    }
                }
            },
            Message::StartGame(StartGame { player_id }) => {
                tracing::debug!(player = %player_id, "peer started");
                self.push_event(SessionEvent::PeerStarted { player: player_id });
            },
            Message::Rebroadcast(RebroadcastRequest { sequence_id, .. }) => {
                let resent = self.synchronizer.retransmit(sequence_id).unwrap_or(false);
                tracing::debug!(sequence_id, resent, "rebroadcast requested");
                self.push_event(SessionEvent::RebroadcastRequested {
                    sequence_id,
                    resent,
                });
            },
            Message::GameField(field) => {
                *self.remote_field.lock() = Some(field);
                self.push_event(SessionEvent::GameFieldReceived {
                    player: field.player_id,
                });
            },
        }
    }

    fn adopt_preferences(&self, preferences: Preferences) {
        self.preferences.lock().active = preferences;
        if let Err(err) = self.store.save(&preferences) {
            report_violation_to!(
                &self.observer,
                ViolationSeverity::Error,
                ViolationKind::Session,
                "cannot save adopted preferences: {}",
                err
            );
        }
        tracing::debug!("peer preferences adopted");
        self.push_event(SessionEvent::PreferencesAdopted);
    }

    fn push_event(&self, event: SessionEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.config.event_queue_size {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn is_stopped(&self) -> bool {
        *self.state.lock() == SessionState::Stopped
    }

    fn ensure_active(&self) -> Result<(), NetplayError> {
        if self.is_stopped() {
            return Err(NetplayError::InvalidRequest {
                info: "the session is stopped".to_owned(),
            });
        }
        Ok(())
    }

    fn send(&self, message: &Message) -> Result<bool, NetplayError> {
        self.ensure_active()?;
        let datagram = codec::encode(message)?;
        Ok(self.transport.send(datagram))
    }
}

/// A running two-player netplay session.
///
/// Created by [`SessionBuilder::start`](crate::SessionBuilder::start). Dropping the
/// session stops it.
///
/// The methods take `&self` and can be called from the game loop while the transport
/// worker delivers remote actions in the background.
pub struct NetplaySession {
    inner: Arc<SessionShared>,
}

impl std::fmt::Debug for NetplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetplaySession")
            .field("local_player", &self.inner.local_player)
            .field("state", &self.state())
            .field("synchronizer", &self.inner.synchronizer)
            .finish_non_exhaustive()
    }
}

impl NetplaySession {
    /// Builds the session and starts its transport.
    pub(crate) fn launch(
        local_player: PlayerId,
        config: SessionConfig,
        local_preferences: Preferences,
        store: Arc<dyn PreferenceStore>,
        observer: Option<Arc<dyn ViolationObserver>>,
        socket: Option<Arc<dyn DatagramSocket>>,
    ) -> Result<Self, NetplayError> {
        let inner = Arc::new_cyclic(|session: &Weak<SessionShared>| {
            let transport = Arc::new(Transport::new(Dispatcher {
                session: session.clone(),
            }));
            let mut synchronizer = ActionSynchronizer::new(local_player, transport.clone())
                .with_history_capacity(config.rebroadcast_history)
                .with_stream_capacity(config.max_pending_remote);
            if let Some(observer) = &observer {
                synchronizer = synchronizer.with_violation_observer(Arc::clone(observer));
            }
            SessionShared {
                local_player,
                transport,
                synchronizer,
                preferences: Mutex::new(PreferenceState {
                    local: local_preferences,
                    active: local_preferences,
                }),
                store,
                events: Mutex::new(VecDeque::new()),
                remote_field: Mutex::new(None),
                state: Mutex::new(SessionState::Running),
                observer,
                config,
            }
        });

        match socket {
            Some(socket) => inner.transport.attach_socket(socket)?,
            None => inner.transport.configure(&inner.config.transport),
        }
        inner.transport.start()?;

        tracing::info!(player = %local_player, "netplay session started");
        Ok(Self { inner })
    }

    /// The player this peer plays.
    #[must_use]
    pub fn local_player(&self) -> PlayerId {
        self.inner.local_player
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Parks the transport. Nothing is sent or received until [`resume`](Self::resume);
    /// local actions recorded meanwhile are staged and flushed after resuming.
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped.
    pub fn pause(&self) -> Result<(), NetplayError> {
        {
            let mut state = self.inner.state.lock();
            if *state == SessionState::Stopped {
                return Err(NetplayError::InvalidRequest {
                    info: "cannot pause a stopped session".to_owned(),
                });
            }
            *state = SessionState::Paused;
        }
        self.inner.transport.pause();
        tracing::debug!("session paused");
        Ok(())
    }

    /// Wakes the transport after [`pause`](Self::pause).
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped.
    pub fn resume(&self) -> Result<(), NetplayError> {
        {
            let mut state = self.inner.state.lock();
            if *state == SessionState::Stopped {
                return Err(NetplayError::InvalidRequest {
                    info: "cannot resume a stopped session".to_owned(),
                });
            }
            *state = SessionState::Running;
        }
        self.inner.transport.resume();
        tracing::debug!("session resumed");
        Ok(())
    }

    /// Ends the session.
    ///
    /// Restores the local preferences to the store (player two may have adopted the
    /// peer's), stops the transport (waiting up to one receive timeout) and discards all
    /// streams, events and snapshots. Calling it again does nothing.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == SessionState::Stopped {
                return;
            }
            *state = SessionState::Stopped;
        }

        self.inner.transport.stop();

        let local = {
            let mut preferences = self.inner.preferences.lock();
            preferences.active = preferences.local;
            preferences.local
        };
        if let Err(err) = self.inner.store.save(&local) {
            report_violation_to!(
                &self.inner.observer,
                ViolationSeverity::Error,
                ViolationKind::Session,
                "cannot restore local preferences: {}",
                err
            );
        }

        self.inner.synchronizer.initialize();
        self.inner.events.lock().clear();
        self.inner.remote_field.lock().take();
        tracing::info!(player = %self.inner.local_player, "netplay session stopped");
    }

    /// Starts a new round: both action streams restart at sequence id 1 and the remote
    /// snapshot is discarded. Both peers must reset together.
    pub fn reset(&self) {
        self.inner.synchronizer.initialize();
        self.inner.remote_field.lock().take();
    }

    /// Records a local action: assigns its sequence id, sends it and queues it for
    /// [`next_local_action`](Self::next_local_action).
    ///
    /// A `transmitted == false` result means the transport was still busy with the
    /// previous datagram (a `TxFlood` event was raised). The action stays recorded and
    /// can be recovered by the peer with a rebroadcast request.
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped.
    pub fn record_local_action(&self, action: PlayerAction) -> Result<LocalRecord, NetplayError> {
        self.inner.ensure_active()?;
        self.inner.synchronizer.record_local_action(action)
    }

    /// The next remote action in sequence order, `None` while it has not arrived.
    pub fn next_remote_action(&self) -> Option<PlayerAction> {
        self.inner.synchronizer.next_remote_action()
    }

    /// Like [`next_remote_action`](Self::next_remote_action) without consuming it.
    #[must_use]
    pub fn peek_remote_action(&self) -> Option<PlayerAction> {
        self.inner.synchronizer.peek_remote_action()
    }

    /// The next recorded local action, in sequence order.
    pub fn next_local_action(&self) -> Option<PlayerAction> {
        self.inner.synchronizer.next_local_action()
    }

    /// Announces this peer to the session (`JOIN_GAME`). Player one answers with its
    /// preferences. Returns whether the transport accepted the datagram.
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped.
    pub fn join(&self) -> Result<bool, NetplayError> {
        self.inner.send(&Message::JoinGame(JoinGame {
            player_id: self.inner.local_player,
        }))
    }

    /// Tells the peer this player is ready (`START_GAME`). Returns whether the transport
    /// accepted the datagram.
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped.
    pub fn announce_start(&self) -> Result<bool, NetplayError> {
        self.inner.send(&Message::StartGame(StartGame {
            player_id: self.inner.local_player,
        }))
    }

    /// Sends the local preferences (`SET_PREFS`). Only player one's preferences count.
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped or the local player is
    /// not player one.
    pub fn broadcast_preferences(&self) -> Result<bool, NetplayError> {
        if !self.inner.local_player.is_host() {
            return Err(NetplayError::InvalidRequest {
                info: format!(
                    "{} cannot broadcast preferences; only {} can",
                    self.inner.local_player,
                    PlayerId::One
                ),
            });
        }
        let local = self.inner.preferences.lock().local;
        self.inner.send(&Message::SetPrefs(local))
    }

    /// Asks the peer to send the remote action that blocks delivery again.
    ///
    /// Nothing calls this automatically; without it a lost action stalls the remote stream
    /// until the action arrives on its own. Returns the requested sequence id, or `None`
    /// if nothing is missing or the transport rejected the request.
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped.
    pub fn request_rebroadcast(&self) -> Result<Option<u16>, NetplayError> {
        let Some(sequence_id) = self.inner.synchronizer.missing_remote_sequence() else {
            return Ok(None);
        };
        let sent = self.inner.send(&Message::Rebroadcast(RebroadcastRequest {
            player_id: self.inner.local_player,
            sequence_id,
        }))?;
        Ok(sent.then_some(sequence_id))
    }

    /// Sends a snapshot of the local board. `player_id` is set to the local player.
    ///
    /// # Errors
    ///
    /// [`NetplayError::InvalidRequest`] if the session is stopped.
    pub fn send_game_field(&self, mut field: GameFieldData) -> Result<bool, NetplayError> {
        field.player_id = self.inner.local_player;
        self.inner.send(&Message::GameField(field))
    }

    /// Takes the latest board snapshot received from the peer.
    pub fn take_remote_game_field(&self) -> Option<GameFieldData> {
        self.inner.remote_field.lock().take()
    }

    /// The preferences the session plays with: player one's, once adopted.
    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.inner.preferences.lock().active
    }

    /// This peer's own preferences, as loaded at start.
    #[must_use]
    pub fn local_preferences(&self) -> Preferences {
        self.inner.preferences.lock().local
    }

    /// Takes every event raised since the last call.
    pub fn events(&self) -> EventDrain {
        EventDrain::from_queue(std::mem::take(&mut *self.inner.events.lock()))
    }

    /// A snapshot of the transport's counters.
    pub fn transport_stats(&self) -> TransportStats {
        self.inner.transport.stats()
    }

    /// The session's action streams, for inspection.
    #[must_use]
    pub fn synchronizer(&self) -> &ActionSynchronizer {
        &self.inner.synchronizer
    }
}

impl Drop for NetplaySession {
    fn drop(&mut self) {
        self.stop();
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
    use crate::sessions::preferences::InMemoryPreferenceStore;
    use crate::telemetry::CollectingObserver;
    use std::io;
    use std::thread;
    use web_time::{Duration, Instant};

    /// A socket that records what is sent and replays injected datagrams.
    #[derive(Default)]
    struct LoopSocket {
        inbound: Mutex<VecDeque<Vec<u8>>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl LoopSocket {
        fn inject(&self, message: &Message) {
            self.inbound.lock().push_back(codec::encode(message).unwrap());
        }

        fn sent_messages(&self) -> Vec<Message> {
            self.sent
                .lock()
                .iter()
                .map(|bytes| codec::decode(bytes).unwrap())
                .collect()
        }
    }

    impl DatagramSocket for LoopSocket {
        fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
            self.sent.lock().push(datagram.to_vec());
            Ok(datagram.len())
        }

        fn recv_datagram(&self, buffer: &mut [u8]) -> io::Result<usize> {
            let next = self.inbound.lock().pop_front();
            match next {
                Some(datagram) => {
                    buffer[..datagram.len()].copy_from_slice(&datagram);
                    Ok(datagram.len())
                },
                None => {
                    thread::sleep(std::time::Duration::from_millis(1));
                    Err(io::Error::from(io::ErrorKind::TimedOut))
                },
            }
        }
    }

    struct Fixture {
        session: NetplaySession,
        socket: Arc<LoopSocket>,
        store: Arc<InMemoryPreferenceStore>,
        observer: Arc<CollectingObserver>,
    }

    fn fixture(local_player: PlayerId, local_preferences: Preferences) -> Fixture {
        let socket = Arc::new(LoopSocket::default());
        let store = Arc::new(InMemoryPreferenceStore::with_preferences(local_preferences));
        let observer = Arc::new(CollectingObserver::new());
        let session = NetplaySession::launch(
            local_player,
            SessionConfig::default(),
            local_preferences,
            store.clone(),
            Some(observer.clone()),
            Some(socket.clone()),
        )
        .unwrap();
        Fixture {
            session,
            socket,
            store,
            observer,
        }
    }

    #[track_caller]
    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn remote_action(sequence_id: u16) -> Message {
        let mut action = PlayerAction::new(PlayerId::Two);
        action.sequence_id = sequence_id;
        Message::Action(action)
    }

    #[test]
    fn remote_actions_reach_the_game_loop_in_order() {
        let f = fixture(PlayerId::One, Preferences::default());
        f.socket.inject(&remote_action(2));
        f.socket.inject(&remote_action(1));
        f.socket.inject(&remote_action(3));
        wait_until(|| f.session.synchronizer().pending_remote_len() == 3);

        let ids: Vec<u16> = std::iter::from_fn(|| f.session.next_remote_action())
            .map(|a| a.sequence_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn own_echo_is_ignored() {
        let f = fixture(PlayerId::One, Preferences::default());
        let mut echo = PlayerAction::new(PlayerId::One);
        echo.sequence_id = 1;
        f.socket.inject(&Message::Action(echo));
        f.socket.inject(&remote_action(1));
        wait_until(|| f.session.peek_remote_action().is_some());
        assert_eq!(f.session.synchronizer().pending_remote_len(), 1);
        assert!(f.observer.is_empty());
    }

    #[test]
    fn joining_peer_adopts_host_preferences_and_restores_on_stop() {
        let local = Preferences {
            difficulty: 1,
            ..Preferences::default()
        };
        let host = Preferences {
            difficulty: 9,
            compressor: true,
            ..Preferences::default()
        };
        let f = fixture(PlayerId::Two, local);
        f.socket.inject(&Message::SetPrefs(host));
        wait_until(|| f.session.preferences() == host);

        assert_eq!(f.session.local_preferences(), local);
        assert_eq!(f.store.current(), Some(host));
        assert!(f
            .session
            .events()
            .any(|e| e == SessionEvent::PreferencesAdopted));

        f.session.stop();
        assert_eq!(f.store.current(), Some(local));
        assert_eq!(f.session.preferences(), local);
        assert_eq!(f.session.state(), SessionState::Stopped);
    }

    #[test]
    fn host_ignores_peer_preferences() {
        let f = fixture(PlayerId::One, Preferences::default());
        f.socket.inject(&Message::SetPrefs(Preferences {
            difficulty: 9,
            ..Preferences::default()
        }));
        f.socket.inject(&remote_action(1));
        wait_until(|| f.session.peek_remote_action().is_some());
        assert_eq!(f.session.preferences(), Preferences::default());
    }

    #[test]
    fn host_answers_join_with_preferences() {
        let prefs = Preferences {
            target_mode: 1,
            ..Preferences::default()
        };
        let f = fixture(PlayerId::One, prefs);
        f.socket.inject(&Message::JoinGame(JoinGame {
            player_id: PlayerId::Two,
        }));
        wait_until(|| !f.socket.sent_messages().is_empty());
        assert_eq!(f.socket.sent_messages(), vec![Message::SetPrefs(prefs)]);
        assert_eq!(
            f.session.events().next(),
            Some(SessionEvent::PeerJoined {
                player: PlayerId::Two
            })
        );
    }

    #[test]
    fn rebroadcast_request_resends_from_history() {
        let f = fixture(PlayerId::One, Preferences::default());
        let record = f
            .session
            .record_local_action(PlayerAction::new(PlayerId::One))
            .unwrap();
        wait_until(|| f.socket.sent_messages().len() == 1);

        f.socket.inject(&Message::Rebroadcast(RebroadcastRequest {
            player_id: PlayerId::Two,
            sequence_id: record.sequence_id,
        }));
        wait_until(|| f.socket.sent_messages().len() == 2);
        let sent = f.socket.sent_messages();
        assert_eq!(sent[0], sent[1]);
        wait_until(|| {
            f.session.events().any(|e| {
                e == SessionEvent::RebroadcastRequested {
                    sequence_id: 1,
                    resent: true,
                }
            })
        });
    }

    #[test]
    fn request_rebroadcast_names_the_missing_action() {
        let f = fixture(PlayerId::Two, Preferences::default());
        assert_eq!(f.session.request_rebroadcast().unwrap(), None);

        let mut action = PlayerAction::new(PlayerId::One);
        action.sequence_id = 2;
        f.socket.inject(&Message::Action(action));
        wait_until(|| f.session.synchronizer().pending_remote_len() == 1);

        assert_eq!(f.session.request_rebroadcast().unwrap(), Some(1));
        wait_until(|| !f.socket.sent_messages().is_empty());
        assert_eq!(
            f.socket.sent_messages(),
            vec![Message::Rebroadcast(RebroadcastRequest {
                player_id: PlayerId::Two,
                sequence_id: 1,
            })]
        );
    }

    #[test]
    fn game_field_snapshot_is_kept() {
        let f = fixture(PlayerId::One, Preferences::default());
        let mut field = GameFieldData::empty(PlayerId::Two);
        field.set_cell(0, 0, 3);
        f.socket.inject(&Message::GameField(field));
        wait_until(|| {
            f.session
                .events()
                .any(|e| e == SessionEvent::GameFieldReceived { player: PlayerId::Two })
        });
        assert_eq!(f.session.take_remote_game_field(), Some(field));
        assert_eq!(f.session.take_remote_game_field(), None);
    }

    #[test]
    fn undecodable_datagram_is_reported() {
        let f = fixture(PlayerId::One, Preferences::default());
        f.socket.inbound.lock().push_back(vec![5, 1, 2]);
        wait_until(|| f.observer.has_violation(ViolationKind::Codec));
    }

    #[test]
    fn stopped_session_rejects_sends() {
        let f = fixture(PlayerId::One, Preferences::default());
        f.session.stop();
        f.session.stop();
        assert!(f
            .session
            .record_local_action(PlayerAction::new(PlayerId::One))
            .is_err());
        assert!(f.session.join().is_err());
        assert!(f.session.pause().is_err());
        assert!(f.session.resume().is_err());
        assert_eq!(f.session.events().len(), 0);
    }

    #[test]
    fn only_the_host_broadcasts_preferences() {
        let f = fixture(PlayerId::Two, Preferences::default());
        assert!(matches!(
            f.session.broadcast_preferences(),
            Err(NetplayError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn event_queue_drops_oldest() {
        let f = fixture(PlayerId::One, Preferences::default());
        for _ in 0..(SessionConfig::default().event_queue_size + 5) {
            f.session.inner.push_event(SessionEvent::PreferencesAdopted);
        }
        f.session
            .inner
            .push_event(SessionEvent::PeerStarted { player: PlayerId::Two });
        let events: Vec<SessionEvent> = f.session.events().collect();
        assert_eq!(events.len(), SessionConfig::default().event_queue_size);
        assert_eq!(
            events.last(),
            Some(&SessionEvent::PeerStarted {
                player: PlayerId::Two
            })
        );
    }
}
