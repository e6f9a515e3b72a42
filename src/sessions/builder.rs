//! Builder for [`NetplaySession`](crate::NetplaySession).

use crate::sessions::config::{SessionConfig, TransportConfig};
use crate::sessions::netplay_session::NetplaySession;
use crate::sessions::preferences::{InMemoryPreferenceStore, PreferenceStore};
use crate::sync::Arc;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, DatagramSocket, NetplayError, PlayerId, Preferences};

/// The [`SessionBuilder`] builds a [`NetplaySession`].
///
/// After setting all appropriate values, call [`start`](Self::start) to open the socket,
/// spawn the transport worker and get the running session.
///
/// ```no_run
/// use std::sync::Arc;
/// use bubble_netplay::{
///     telemetry::CollectingObserver, InMemoryPreferenceStore, PlayerId, SessionBuilder,
///     TransportConfig,
/// };
///
/// let observer = Arc::new(CollectingObserver::new());
/// let session = SessionBuilder::new(PlayerId::Two)
///     .with_transport_config(TransportConfig::broadcast())
///     .with_preference_store(Arc::new(InMemoryPreferenceStore::new()))
///     .with_violation_observer(observer.clone())
///     .start()?;
/// session.join()?;
/// # Ok::<(), bubble_netplay::NetplayError>(())
/// ```
#[must_use = "SessionBuilder must be consumed by calling start()"]
pub struct SessionBuilder {
    local_player: PlayerId,
    config: SessionConfig,
    /// Used when the store has nothing stored.
    preferences: Option<Preferences>,
    store: Option<Arc<dyn PreferenceStore>>,
    /// Optional observer for violations.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    /// Replaces the socket `config.transport` would open.
    socket: Option<Arc<dyn DatagramSocket>>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            local_player,
            config,
            preferences,
            store,
            violation_observer,
            socket,
        } = self;

        f.debug_struct("SessionBuilder")
            .field("local_player", local_player)
            .field("config", config)
            .field("preferences", preferences)
            .field("has_preference_store", &store.is_some())
            .field("has_violation_observer", &violation_observer.is_some())
            .field("has_custom_socket", &socket.is_some())
            .finish()
    }
}

impl SessionBuilder {
    /// A builder for a session played by `local_player`, with all values set to their
    /// defaults.
    pub fn new(local_player: PlayerId) -> Self {
        Self {
            local_player,
            config: SessionConfig::default(),
            preferences: None,
            store: None,
            violation_observer: None,
            socket: None,
        }
    }

    /// Replaces the whole session configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the transport part of the configuration.
    pub fn with_transport_config(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    /// The local preferences to use when the preference store has none.
    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Where the local preferences are loaded from and restored to. Defaults to an
    /// [`InMemoryPreferenceStore`].
    pub fn with_preference_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Also reports the session's violations to `observer`.
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Uses `socket` instead of opening the socket described by the transport
    /// configuration.
    pub fn with_socket(mut self, socket: Arc<dyn DatagramSocket>) -> Self {
        self.socket = Some(socket);
        self
    }

    /// Consumes the builder, loads the local preferences and starts the session.
    ///
    /// A store that fails to load is reported and the builder's preferences (or the
    /// defaults) are used instead.
    ///
    /// # Errors
    /// - [`NetplayError::InvalidRequest`] if the configuration is invalid.
    /// - [`NetplayError::NotConfigured`] if the socket could not be opened. The cause was
    ///   logged.
    /// - [`NetplayError::InternalError`] if the worker thread could not be spawned.
    pub fn start(self) -> Result<NetplaySession, NetplayError> {
        self.config.validate()?;

        let store: Arc<dyn PreferenceStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryPreferenceStore::new()),
        };
        let fallback = self.preferences.unwrap_or_default();
        let local_preferences = match store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => fallback,
            Err(err) => {
                report_violation_to!(
                    &self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Session,
                    "cannot load local preferences, using fallback: {}",
                    err
                );
                fallback
            },
        };

        NetplaySession::launch(
            self.local_player,
            self.config,
            local_preferences,
            store,
            self.violation_observer,
            self.socket,
        )
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
    use crate::SessionState;
    use std::io;
    use web_time::Duration;

    struct SilentSocket;

    impl DatagramSocket for SilentSocket {
        fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
            Ok(datagram.len())
        }

        fn recv_datagram(&self, _buffer: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(std::time::Duration::from_millis(1));
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }
    }

    struct BrokenStore;

    impl PreferenceStore for BrokenStore {
        fn load(&self) -> Result<Option<Preferences>, NetplayError> {
            Err(NetplayError::InvalidRequest {
                info: "disk on fire".to_owned(),
            })
        }

        fn save(&self, _preferences: &Preferences) -> Result<(), NetplayError> {
            Ok(())
        }
    }

    #[test]
    fn stored_preferences_win_over_builder_preferences() {
        let stored = Preferences {
            difficulty: 3,
            ..Preferences::default()
        };
        let session = SessionBuilder::new(PlayerId::One)
            .with_preferences(Preferences {
                difficulty: 7,
                ..Preferences::default()
            })
            .with_preference_store(Arc::new(InMemoryPreferenceStore::with_preferences(stored)))
            .with_socket(Arc::new(SilentSocket))
            .start()
            .unwrap();
        assert_eq!(session.local_preferences(), stored);
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn builder_preferences_fill_an_empty_store() {
        let prefs = Preferences {
            sound_on: false,
            ..Preferences::default()
        };
        let session = SessionBuilder::new(PlayerId::Two)
            .with_preferences(prefs)
            .with_socket(Arc::new(SilentSocket))
            .start()
            .unwrap();
        assert_eq!(session.preferences(), prefs);
    }

    #[test]
    fn failing_store_falls_back_and_reports() {
        let observer = Arc::new(CollectingObserver::new());
        let session = SessionBuilder::new(PlayerId::One)
            .with_preference_store(Arc::new(BrokenStore))
            .with_violation_observer(observer.clone())
            .with_socket(Arc::new(SilentSocket))
            .start()
            .unwrap();
        assert_eq!(session.local_preferences(), Preferences::default());
        assert!(observer.has_violation(ViolationKind::Session));
    }

    #[test]
    fn invalid_config_is_rejected_before_anything_opens() {
        let result = SessionBuilder::new(PlayerId::One)
            .with_transport_config(TransportConfig {
                receive_timeout: Duration::ZERO,
                ..TransportConfig::default()
            })
            .start();
        assert!(matches!(result, Err(NetplayError::InvalidRequest { .. })));
    }

    #[test]
    #[cfg(not(miri))]
    fn unopenable_socket_is_not_configured() {
        let result = SessionBuilder::new(PlayerId::One)
            .with_transport_config(TransportConfig {
                group: "no-such-host.invalid".to_owned(),
                port: 0,
                ..TransportConfig::default()
            })
            .start();
        assert!(matches!(result, Err(NetplayError::NotConfigured)));
    }

    #[test]
    fn debug_hides_trait_objects() {
        let builder = SessionBuilder::new(PlayerId::One).with_socket(Arc::new(SilentSocket));
        let debug = format!("{builder:?}");
        assert!(debug.contains("has_custom_socket: true"));
        assert!(debug.contains("has_preference_store: false"));
    }
}
