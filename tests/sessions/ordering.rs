//! Delivery order between two live sessions.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::{aim, record_and_flush, session_pair, settle, wait_for, wait_until};
use bubble_netplay::network::codec;
use bubble_netplay::telemetry::ViolationKind;
use bubble_netplay::{Message, PlayerAction, PlayerId, SessionEvent};

/// Drops the first `ACTION` datagram carrying `sequence_id`, lets everything else through.
fn drop_action_once(sequence_id: u16) -> impl FnMut(&[u8]) -> bool + Send + 'static {
    let dropped = Arc::new(AtomicBool::new(false));
    move |datagram: &[u8]| match codec::decode(datagram) {
        Ok(Message::Action(action)) if action.sequence_id == sequence_id => {
            !dropped.swap(true, Ordering::SeqCst)
        },
        _ => false,
    }
}

fn next_remote(session: &bubble_netplay::NetplaySession) -> PlayerAction {
    wait_for(|| session.next_remote_action()).expect("remote action should arrive")
}

#[test]
fn actions_arrive_in_order_on_a_clean_link() {
    let pair = session_pair();

    for step in 0..5 {
        record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, f64::from(step)));
    }

    for expected in 1..=5u16 {
        let action = next_remote(&pair.guest);
        assert_eq!(action.sequence_id, expected);
        assert_eq!(action.player_id, PlayerId::One);
        assert!((action.aim_position - f64::from(expected - 1)).abs() < f64::EPSILON);
    }
    assert!(pair.guest.next_remote_action().is_none());
    assert!(pair.observer.is_empty());
}

#[test]
fn both_directions_are_independent_streams() {
    let pair = session_pair();

    record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, 0.1));
    record_and_flush(&pair.guest, &pair.guest_socket, aim(PlayerId::Two, 0.2));
    record_and_flush(&pair.guest, &pair.guest_socket, aim(PlayerId::Two, 0.3));

    assert_eq!(next_remote(&pair.guest).sequence_id, 1);
    assert_eq!(next_remote(&pair.host).sequence_id, 1);
    assert_eq!(next_remote(&pair.host).sequence_id, 2);

    // Local streams hand back what was recorded, in order.
    assert_eq!(pair.host.next_local_action().unwrap().sequence_id, 1);
    assert!(pair.host.next_local_action().is_none());
    assert_eq!(pair.guest.next_local_action().unwrap().sequence_id, 1);
    assert_eq!(pair.guest.next_local_action().unwrap().sequence_id, 2);
}

#[test]
fn reordered_datagrams_are_delivered_in_sequence() {
    let pair = session_pair();
    pair.host_socket.hold();

    for step in 0..3 {
        record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, f64::from(step)));
    }
    assert_eq!(pair.host_socket.held_len(), 3);

    // 2, 1, 3 on the wire.
    pair.host_socket.release(&[1, 0, 2]);

    let delivered: Vec<u16> = (0..3).map(|_| next_remote(&pair.guest).sequence_id).collect();
    assert_eq!(delivered, vec![1, 2, 3]);
}

#[test]
fn action_two_is_held_back_until_action_one_arrives() {
    let pair = session_pair();
    pair.host_socket.hold();
    record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, 0.0));
    record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, 0.5));

    // Only action 2 arrives.
    pair.host_socket.release(&[1]);
    assert!(wait_until(|| pair.guest.synchronizer().pending_remote_len() == 1));
    assert!(pair.guest.next_remote_action().is_none());
    assert_eq!(pair.guest.synchronizer().missing_remote_sequence(), Some(1));

    // Action 1 shows up late, straight from the peer.
    let mut late = aim(PlayerId::One, 0.0);
    late.sequence_id = 1;
    pair.guest_socket
        .inject(codec::encode(&Message::Action(late)).unwrap());

    assert_eq!(next_remote(&pair.guest).sequence_id, 1);
    assert_eq!(next_remote(&pair.guest).sequence_id, 2);
}

#[test]
fn lost_action_stalls_until_rebroadcast() {
    let pair = session_pair();
    pair.host_socket.drop_where(drop_action_once(2));

    for step in 0..3 {
        record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, f64::from(step)));
    }

    assert_eq!(next_remote(&pair.guest).sequence_id, 1);
    assert!(wait_until(|| pair.guest.synchronizer().pending_remote_len() == 1));
    settle();
    // 3 is buffered but 2 never came.
    assert!(pair.guest.next_remote_action().is_none());

    let requested = pair.guest.request_rebroadcast().unwrap();
    assert_eq!(requested, Some(2));

    assert_eq!(next_remote(&pair.guest).sequence_id, 2);
    assert_eq!(next_remote(&pair.guest).sequence_id, 3);

    assert!(wait_until(|| {
        pair.host.events().any(|event| {
            event
                == SessionEvent::RebroadcastRequested {
                    sequence_id: 2,
                    resent: true,
                }
        })
    }));
}

#[test]
fn nothing_missing_means_no_rebroadcast_request() {
    let pair = session_pair();
    let before = pair.guest_socket.sent().len();
    assert_eq!(pair.guest.request_rebroadcast().unwrap(), None);
    settle();
    assert_eq!(pair.guest_socket.sent().len(), before);
}

#[test]
fn duplicated_datagrams_are_delivered_once() {
    let pair = session_pair();
    record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, 0.3));

    let first = pair.host_socket.sent()[0].clone();
    pair.guest_socket.inject(first.clone());
    pair.guest_socket.inject(first);

    assert_eq!(next_remote(&pair.guest).sequence_id, 1);
    assert!(wait_until(|| pair.guest_socket.pending_inbound() == 0));
    settle();
    assert!(pair.guest.next_remote_action().is_none());
    assert_eq!(pair.guest.synchronizer().expected_remote_sequence(), 2);
}

#[test]
fn echoed_own_actions_are_ignored() {
    let pair = session_pair();
    record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, 0.7));

    // What multicast loopback would deliver back to the sender.
    let echo = pair.host_socket.sent()[0].clone();
    pair.host_socket.inject(echo);

    assert!(wait_until(|| pair.host_socket.pending_inbound() == 0));
    settle();
    assert!(pair.host.next_remote_action().is_none());
    assert_eq!(pair.host.synchronizer().pending_remote_len(), 0);
    assert!(!pair.observer.has_violation(ViolationKind::ActionStream));
}

#[test]
fn garbage_datagrams_are_reported_and_skipped() {
    let pair = session_pair();
    pair.guest_socket.inject(vec![0xEE, 1, 2, 3]);
    pair.guest_socket.inject(Vec::new());

    record_and_flush(&pair.host, &pair.host_socket, aim(PlayerId::One, 0.0));
    assert_eq!(next_remote(&pair.guest).sequence_id, 1);
    assert!(wait_until(|| pair.observer.has_violation(ViolationKind::Codec)));
}
