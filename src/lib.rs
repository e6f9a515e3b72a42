//! # Bubble Netplay
//!
//! Bubble Netplay is the synchronization core of a two-player bubble-shooter duel played
//! over a local network. Two game instances exchange discrete player actions over a
//! best-effort UDP multicast (or broadcast) group and hand them to their game loops
//! strictly in sequence order.
//!
//! The crate is made of four layers:
//!
//! - [`Transport`]: one socket, one background worker that alternates between flushing a
//!   single staged datagram and a time-bounded receive. Everything it observes is reported
//!   to a [`TransportListener`] as a [`TransportEvent`].
//! - [`network::codec`]: the fixed-layout, big-endian wire format. Every datagram is a
//!   one-byte [`MessageType`] followed by a fixed-size payload.
//! - [`ActionSynchronizer`]: per-peer action streams, duplicate suppression and
//!   consecutive delivery. Remote action `N + 1` is never handed out before `N`.
//! - [`NetplaySession`]: wires the layers together, owns the lifecycle and the
//!   preference exchange between the two peers.
//!
//! ```no_run
//! use bubble_netplay::{PlayerAction, PlayerId, SessionBuilder};
//!
//! let session = SessionBuilder::new(PlayerId::One).start()?;
//!
//! // The game loop records what the local player did ...
//! let mut action = PlayerAction::new(PlayerId::One);
//! action.launch = true;
//! action.aim_position = 0.25;
//! session.record_local_action(action)?;
//!
//! // ... and applies whatever the peer did, in order.
//! while let Some(remote) = session.next_remote_action() {
//!     let _ = remote.command();
//! }
//! # Ok::<(), bubble_netplay::NetplayError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::io;

pub use action_sync::{ActionOutbound, ActionSynchronizer, LocalRecord, RemoteOutcome};
pub use error::NetplayError;
pub use network::codec::CodecError;
pub use network::messages::{
    ActionCommand, GameFieldData, JoinGame, Message, MessageType, PlayerAction, Preferences,
    RebroadcastRequest, StartGame, ATTACK_COLUMNS, FIELD_COLUMNS, FIELD_ROWS,
};
pub use network::multicast_socket::MulticastSocket;
pub use network::transport::{Transport, TransportEvent, TransportListener};
pub use network::transport_stats::TransportStats;
pub use sessions::builder::SessionBuilder;
pub use sessions::config::{SessionConfig, TransportConfig};
pub use sessions::event_drain::EventDrain;
pub use sessions::netplay_session::{NetplaySession, SessionEvent, SessionState};
#[cfg(feature = "json")]
pub use sessions::preferences::JsonFilePreferenceStore;
pub use sessions::preferences::{InMemoryPreferenceStore, PreferenceStore};

pub mod action_sync;
#[doc(hidden)]
pub mod error;
pub mod telemetry;
pub(crate) mod sync;
pub mod sessions {
    //! Session glue: configuration, preference handling and the session itself.
    pub mod builder;
    pub mod config;
    pub mod event_drain;
    pub mod netplay_session;
    pub mod preferences;
}
pub mod network {
    //! Wire format and datagram transport.

    /// Fixed-layout binary codec for every message shape.
    pub mod codec;
    pub mod messages;
    pub mod multicast_socket;
    pub mod transport;
    #[doc(hidden)]
    pub mod transport_stats;
}

// #############
// # CONSTANTS #
// #############

/// Color value meaning "no bubble" / "unset" in every color field and grid cell.
pub const NO_BUBBLE: i8 = -1;

/// The first sequence id a freshly initialized stream assigns and expects.
///
/// `0` is reserved and never assigned.
pub const FIRST_SEQUENCE_ID: u16 = 1;

/// Returns the sequence id that follows `id`.
///
/// After `u16::MAX` the counter continues at [`FIRST_SEQUENCE_ID`], skipping the reserved `0`.
///
/// ```
/// use bubble_netplay::{next_sequence_id, FIRST_SEQUENCE_ID};
///
/// assert_eq!(next_sequence_id(0), FIRST_SEQUENCE_ID);
/// assert_eq!(next_sequence_id(41), 42);
/// assert_eq!(next_sequence_id(u16::MAX), FIRST_SEQUENCE_ID);
/// ```
#[inline]
#[must_use]
pub const fn next_sequence_id(id: u16) -> u16 {
    if id == u16::MAX {
        FIRST_SEQUENCE_ID
    } else {
        id + 1
    }
}

/// Returns `true` if `candidate` lies before `expected` in the (wrapping) sequence space,
/// i.e. it belongs to an action that was already consumed.
///
/// Half of the id space behind `expected` counts as "already consumed", the other half as
/// "still to come".
///
/// ```
/// use bubble_netplay::sequence_precedes;
///
/// assert!(sequence_precedes(3, 5));
/// assert!(!sequence_precedes(5, 5));
/// assert!(!sequence_precedes(9, 5));
/// assert!(sequence_precedes(65_530, 2));
/// ```
#[inline]
#[must_use]
pub const fn sequence_precedes(candidate: u16, expected: u16) -> bool {
    candidate != expected && expected.wrapping_sub(candidate) < 0x8000
}

// #############
// #   TYPES   #
// #############

/// One of the two participants of a duel.
///
/// Player one is, by convention, the peer that opened the session; its preferences are
/// the ones both peers play with. On the wire a player is a single byte, `1` or `2`.
///
/// ```
/// use bubble_netplay::PlayerId;
///
/// assert_eq!(PlayerId::One.opponent(), PlayerId::Two);
/// assert_eq!(u8::from(PlayerId::Two), 2);
/// assert!(PlayerId::try_from(3u8).is_err());
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum PlayerId {
    /// The session-initiating peer.
    #[default]
    One,
    /// The joining peer.
    Two,
}

impl PlayerId {
    /// Returns the other participant.
    #[inline]
    #[must_use]
    pub const fn opponent(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    /// Returns `true` for the peer whose preferences the session adopts.
    #[inline]
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::One)
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player {}", u8::from(*self))
    }
}

impl From<PlayerId> for u8 {
    #[inline]
    fn from(player: PlayerId) -> Self {
        match player {
            PlayerId::One => 1,
            PlayerId::Two => 2,
        }
    }
}

impl TryFrom<u8> for PlayerId {
    type Error = NetplayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(NetplayError::InvalidRequest {
                info: format!("{other} is not a player id (expected 1 or 2)"),
            }),
        }
    }
}

// #############
// #  TRAITS   #
// #############

/// The socket seam of the [`Transport`].
///
/// A `DatagramSocket` sends to and receives from the session's peer group, UDP-style:
/// unordered, unreliable, one message per datagram. [`MulticastSocket`] is the real
/// implementation; tests plug in in-memory sockets.
///
/// Both methods are called from the transport's worker thread only.
pub trait DatagramSocket: Send + Sync {
    /// Sends one datagram to the peer group.
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize>;

    /// Waits for one datagram, but no longer than the socket's receive timeout.
    ///
    /// An expired timeout must be reported as [`io::ErrorKind::WouldBlock`] or
    /// [`io::ErrorKind::TimedOut`]; the transport treats both as "nothing arrived".
    fn recv_datagram(&self, buffer: &mut [u8]) -> io::Result<usize>;
}
