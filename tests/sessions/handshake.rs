//! Join handshake, readiness and preference exchange.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{session_pair, session_pair_with, settle, wait_for, wait_until};
use bubble_netplay::network::codec;
use bubble_netplay::{
    GameFieldData, Message, NetplayError, PlayerId, PreferenceStore, Preferences, SessionEvent,
};

fn host_preferences() -> Preferences {
    Preferences {
        collision: 2,
        compressor: false,
        difficulty: 5,
        game_mode: 1,
        target_mode: 3,
        ..Preferences::default()
    }
}

fn guest_preferences() -> Preferences {
    Preferences {
        difficulty: 1,
        fullscreen: true,
        music_on: false,
        ..Preferences::default()
    }
}

#[test]
fn join_is_answered_with_host_preferences() {
    let pair = session_pair_with(host_preferences(), guest_preferences());
    assert_eq!(pair.guest.preferences(), guest_preferences());

    assert!(pair.guest.join().unwrap());

    assert!(wait_until(|| pair.guest.preferences() == host_preferences()));
    assert_eq!(pair.guest.local_preferences(), guest_preferences());
    assert_eq!(pair.guest_store.current(), Some(host_preferences()));

    let host_events: Vec<SessionEvent> = pair.host.events().collect();
    assert!(host_events.contains(&SessionEvent::PeerJoined {
        player: PlayerId::Two
    }));
    assert!(wait_until(|| pair
        .guest
        .events()
        .any(|event| event == SessionEvent::PreferencesAdopted)));

    // The host keeps its own.
    assert_eq!(pair.host.preferences(), host_preferences());
}

#[test]
fn stopping_restores_the_local_preferences() {
    let pair = session_pair_with(host_preferences(), guest_preferences());
    assert!(pair.guest.join().unwrap());
    assert!(wait_until(|| pair.guest_store.current() == Some(host_preferences())));

    pair.guest.stop();
    assert_eq!(pair.guest_store.load().unwrap(), Some(guest_preferences()));
    assert_eq!(pair.guest.preferences(), guest_preferences());
}

#[test]
fn host_ignores_preferences_from_the_guest() {
    let pair = session_pair_with(host_preferences(), guest_preferences());

    let datagram = codec::encode(&Message::SetPrefs(guest_preferences())).unwrap();
    pair.host_socket.inject(datagram);
    assert!(wait_until(|| pair.host_socket.pending_inbound() == 0));
    settle();

    assert_eq!(pair.host.preferences(), host_preferences());
    assert_eq!(pair.host_store.current(), Some(host_preferences()));
    assert_eq!(pair.host.events().len(), 0);
}

#[test]
fn only_player_one_broadcasts_preferences() {
    let pair = session_pair_with(host_preferences(), guest_preferences());

    assert!(matches!(
        pair.guest.broadcast_preferences(),
        Err(NetplayError::InvalidRequest { .. })
    ));

    assert!(pair.host.broadcast_preferences().unwrap());
    assert!(wait_until(|| pair.guest.preferences() == host_preferences()));
}

#[test]
fn start_announcement_reaches_the_peer() {
    let pair = session_pair();
    assert!(pair.host.announce_start().unwrap());
    assert!(wait_until(|| pair.guest.events().any(|event| {
        event
            == SessionEvent::PeerStarted {
                player: PlayerId::One,
            }
    })));
}

#[test]
fn game_field_snapshot_is_delivered() {
    let pair = session_pair();
    let mut field = GameFieldData::empty(PlayerId::Two);
    field.compressor_steps = 4;
    field.launch_color = 2;
    assert!(field.set_cell(0, 0, 1));
    assert!(field.set_cell(7, 11, 6));

    // The session stamps the sender, whatever the caller put in.
    field.player_id = PlayerId::One;
    assert!(pair.guest.send_game_field(field).unwrap());

    let received = wait_for(|| pair.host.take_remote_game_field()).unwrap();
    assert_eq!(received.player_id, PlayerId::Two);
    assert_eq!(received.compressor_steps, 4);
    assert_eq!(received.cell(0, 0), Some(1));
    assert_eq!(received.cell(7, 11), Some(6));
    assert_eq!(received.occupied_cells(), 2);
    assert!(pair.host.take_remote_game_field().is_none());
    assert!(wait_until(|| pair.host.events().any(|event| {
        event
            == SessionEvent::GameFieldReceived {
                player: PlayerId::Two,
            }
    })));
}
