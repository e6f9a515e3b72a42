//! Configuration types for netplay sessions.
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `TransportConfig` | Socket, group and receive timeout | `lan()`, `broadcast()`, `localhost_test()` |
//! | `SessionConfig` | Bounds of the session's queues | `lossy()` |
//!
//! # Example
//!
//! ```
//! use bubble_netplay::{SessionConfig, TransportConfig};
//! use web_time::Duration;
//!
//! let config = SessionConfig {
//!     transport: TransportConfig {
//!         port: 6600,
//!         receive_timeout: Duration::from_millis(50),
//!         ..TransportConfig::lan()
//!     },
//!     ..SessionConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use web_time::Duration;

use crate::NetplayError;

/// Default multicast group both peers join.
pub const DEFAULT_GROUP: &str = "239.168.0.1";
/// Default UDP port.
pub const DEFAULT_PORT: u16 = 5500;
/// Limited broadcast address used by [`TransportConfig::broadcast`].
pub const BROADCAST_GROUP: &str = "255.255.255.255";

const MAX_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration of the [`Transport`](crate::Transport) socket.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Construct instances with
/// `..TransportConfig::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[must_use = "TransportConfig has no effect unless passed to Transport::configure() or SessionBuilder::with_transport_config()"]
pub struct TransportConfig {
    /// Multicast group (or, in broadcast mode, the destination address), as an IPv4
    /// address or a resolvable host name.
    ///
    /// Default: `239.168.0.1`
    pub group: String,
    /// UDP port, both bound locally and used as the destination port.
    ///
    /// Default: `5500`
    pub port: u16,
    /// How long one receive waits before the worker goes back to check its mailbox.
    /// This bounds the latency of a staged send while the line is quiet.
    ///
    /// Default: 20ms
    pub receive_timeout: Duration,
    /// Send to a broadcast address instead of joining a multicast group.
    ///
    /// Default: `false`
    pub broadcast: bool,
    /// Do not deliver our own multicast datagrams back to us.
    ///
    /// Echoes are filtered by player id anyway; disabling loopback avoids the extra traffic.
    /// Two peers on the same host need it enabled.
    ///
    /// Default: `true`
    pub loopback_disabled: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_owned(),
            port: DEFAULT_PORT,
            receive_timeout: Duration::from_millis(20),
            broadcast: false,
            loopback_disabled: true,
        }
    }
}

impl TransportConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Two machines on one LAN segment. Same as the defaults.
    pub fn lan() -> Self {
        Self::default()
    }

    /// Broadcast instead of multicast, for networks that drop multicast traffic.
    pub fn broadcast() -> Self {
        Self {
            group: BROADCAST_GROUP.to_owned(),
            broadcast: true,
            ..Self::default()
        }
    }

    /// Two peers on the same host, e.g. in tests. Loopback is enabled and the receive
    /// timeout is short.
    pub fn localhost_test(port: u16) -> Self {
        Self {
            port,
            receive_timeout: Duration::from_millis(10),
            loopback_disabled: false,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NetplayError::InvalidRequest`] for an empty group, a zero receive timeout
    /// (the socket would block forever) or a receive timeout above one second.
    pub fn validate(&self) -> Result<(), NetplayError> {
        if self.group.trim().is_empty() {
            return Err(NetplayError::InvalidRequest {
                info: "transport group must not be empty".to_owned(),
            });
        }
        if self.receive_timeout.is_zero() || self.receive_timeout > MAX_RECEIVE_TIMEOUT {
            return Err(NetplayError::InvalidRequest {
                info: format!(
                    "receive_timeout must be between 1ms and {}ms, got {}ms",
                    MAX_RECEIVE_TIMEOUT.as_millis(),
                    self.receive_timeout.as_millis()
                ),
            });
        }
        Ok(())
    }
}

/// Configuration of a [`NetplaySession`](crate::NetplaySession).
///
/// # Example
///
/// ```
/// use bubble_netplay::SessionConfig;
///
/// // Keep a longer history for peers that request rebroadcasts late.
/// let config = SessionConfig {
///     rebroadcast_history: 256,
///     ..SessionConfig::default()
/// };
/// assert_eq!(config.max_pending_remote, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[must_use = "SessionConfig has no effect unless passed to SessionBuilder::with_config()"]
pub struct SessionConfig {
    /// The transport socket.
    pub transport: TransportConfig,
    /// How many recently sent local actions are kept to answer rebroadcast requests.
    /// `0` disables answering them.
    ///
    /// Default: 64
    pub rebroadcast_history: usize,
    /// How many out-of-order remote actions may wait for a missing predecessor. Further
    /// actions are dropped and reported.
    ///
    /// Default: 256
    pub max_pending_remote: usize,
    /// How many undrained [`SessionEvent`](crate::SessionEvent)s are kept. When full, the
    /// oldest event is dropped.
    ///
    /// Default: 128
    pub event_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            rebroadcast_history: 64,
            max_pending_remote: 256,
            event_queue_size: 128,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wireless or congested links that lose datagrams often.
    ///
    /// Keeps four times the default rebroadcast history, so a peer that stalled for a
    /// while can still recover, and lets more out-of-order actions wait for the gap.
    pub fn lossy() -> Self {
        Self {
            rebroadcast_history: 256,
            max_pending_remote: 1024,
            ..Self::default()
        }
    }

    /// Validates the configuration, including the transport part.
    ///
    /// # Errors
    ///
    /// Returns [`NetplayError::InvalidRequest`] if the transport configuration is invalid
    /// or `max_pending_remote` / `event_queue_size` is zero.
    pub fn validate(&self) -> Result<(), NetplayError> {
        self.transport.validate()?;
        if self.max_pending_remote == 0 {
            return Err(NetplayError::InvalidRequest {
                info: "max_pending_remote must be at least 1".to_owned(),
            });
        }
        if self.event_queue_size == 0 {
            return Err(NetplayError::InvalidRequest {
                info: "event_queue_size must be at least 1".to_owned(),
            });
        }
        Ok(())
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

    #[test]
    fn transport_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.group, "239.168.0.1");
        assert_eq!(config.port, 5500);
        assert_eq!(config.receive_timeout, Duration::from_millis(20));
        assert!(!config.broadcast);
        assert!(config.loopback_disabled);
        assert_eq!(config, TransportConfig::lan());
        assert_eq!(config, TransportConfig::new());
    }

    #[test]
    fn transport_presets() {
        let broadcast = TransportConfig::broadcast();
        assert!(broadcast.broadcast);
        assert_eq!(broadcast.group, BROADCAST_GROUP);

        let local = TransportConfig::localhost_test(7000);
        assert_eq!(local.port, 7000);
        assert!(!local.loopback_disabled);
        assert!(local.validate().is_ok());
    }

    #[test]
    fn transport_validate_rejects_bad_timeouts() {
        let zero = TransportConfig {
            receive_timeout: Duration::ZERO,
            ..TransportConfig::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(NetplayError::InvalidRequest { .. })
        ));

        let long = TransportConfig {
            receive_timeout: Duration::from_millis(1001),
            ..TransportConfig::default()
        };
        assert!(long.validate().is_err());

        let max = TransportConfig {
            receive_timeout: Duration::from_secs(1),
            ..TransportConfig::default()
        };
        assert!(max.validate().is_ok());
    }

    #[test]
    fn transport_validate_rejects_empty_group() {
        let config = TransportConfig {
            group: "  ".to_owned(),
            ..TransportConfig::default()
        };
        match config.validate() {
            Err(NetplayError::InvalidRequest { info }) => assert!(info.contains("group")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.rebroadcast_history, 64);
        assert_eq!(config.max_pending_remote, 256);
        assert_eq!(config.event_queue_size, 128);
        assert_eq!(config.transport, TransportConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lossy_preset_widens_the_queues() {
        let lossy = SessionConfig::lossy();
        let defaults = SessionConfig::default();
        assert!(lossy.rebroadcast_history > defaults.rebroadcast_history);
        assert!(lossy.max_pending_remote > defaults.max_pending_remote);
        assert_eq!(lossy.event_queue_size, defaults.event_queue_size);
        assert_eq!(lossy.transport, TransportConfig::lan());
        assert!(lossy.validate().is_ok());
    }

    #[test]
    fn session_validate() {
        let no_pending = SessionConfig {
            max_pending_remote: 0,
            ..SessionConfig::default()
        };
        assert!(no_pending.validate().is_err());

        let no_events = SessionConfig {
            event_queue_size: 0,
            ..SessionConfig::default()
        };
        assert!(no_events.validate().is_err());

        let no_history = SessionConfig {
            rebroadcast_history: 0,
            ..SessionConfig::default()
        };
        assert!(no_history.validate().is_ok());

        let bad_transport = SessionConfig {
            transport: TransportConfig {
                group: String::new(),
                ..TransportConfig::default()
            },
            ..SessionConfig::default()
        };
        assert!(bad_transport.validate().is_err());
    }
}
