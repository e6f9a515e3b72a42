//! Property-based tests for the codec and the action synchronizer.
//!
//! # Properties Tested
//!
//! ## Codec
//! - Every message decodes back to itself, with the exact wire length of its type
//! - A datagram the decoder accepts re-encodes to the same bytes
//! - Arbitrary bytes produce a message or an error, never a panic
//!
//! ## Action streams
//! - Remote actions are delivered as 1, 2, 3, ... whatever the arrival order
//! - Every action is delivered exactly once, duplicates included
//! - Nothing after a missing id is delivered
//! - Sequence ids never take the reserved value 0

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use bubble_netplay::network::codec::{self, MAX_MESSAGE_LEN};
use bubble_netplay::{
    next_sequence_id, sequence_precedes, ActionOutbound, ActionSynchronizer, GameFieldData,
    JoinGame, Message, PlayerAction, PlayerId, Preferences, RebroadcastRequest, RemoteOutcome,
    StartGame, ATTACK_COLUMNS, FIELD_COLUMNS, FIELD_ROWS,
};
use proptest::prelude::*;

// ============================================================================
// Test Configuration
// ============================================================================

/// Outbound that accepts and forgets everything.
struct Discard;

impl ActionOutbound for Discard {
    fn transmit(&self, _datagram: Vec<u8>) -> bool {
        true
    }
}

fn synchronizer(local: PlayerId) -> ActionSynchronizer {
    ActionSynchronizer::new(local, Arc::new(Discard))
}

fn remote_action(sequence_id: u16) -> PlayerAction {
    let mut action = PlayerAction::new(PlayerId::Two);
    action.sequence_id = sequence_id;
    action.aim_position = f64::from(sequence_id);
    action
}

// ============================================================================
// Strategies
// ============================================================================

fn player() -> impl Strategy<Value = PlayerId> {
    prop_oneof![Just(PlayerId::One), Just(PlayerId::Two)]
}

/// Colors including the edges of the signed byte.
fn color() -> impl Strategy<Value = i8> {
    prop_oneof![Just(-1i8), Just(i8::MIN), Just(i8::MAX), any::<i8>()]
}

fn aim_position() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        Just(-0.0),
        Just(f64::MAX),
        Just(f64::MIN_POSITIVE),
        Just(f64::INFINITY),
        -1.0f64..1.0,
    ]
}

prop_compose! {
    fn player_action()(
        player_id in player(),
        sequence_id in any::<u16>(),
        compress in any::<bool>(),
        launch in any::<bool>(),
        swap in any::<bool>(),
        colors in (color(), color(), color()),
        attack in (any::<i16>(), any::<i16>()),
        attack_bubbles in prop::array::uniform15(color()),
        aim_position in aim_position(),
    ) -> PlayerAction {
        let mut action = PlayerAction::new(player_id);
        action.sequence_id = sequence_id;
        action.compress = compress;
        action.launch = launch;
        action.swap = swap;
        (action.launch_color, action.next_color, action.new_next_color) = colors;
        (action.add_attack_bubbles, action.total_attack_bubbles) = attack;
        action.attack_bubbles = attack_bubbles;
        action.aim_position = aim_position;
        action
    }
}

prop_compose! {
    fn game_field()(
        player_id in player(),
        sequence_id in any::<u16>(),
        compressor_steps in any::<u8>(),
        colors in (color(), color(), color()),
        total_attack_bubbles in any::<i16>(),
        cells in prop::collection::vec(color(), FIELD_ROWS * FIELD_COLUMNS),
    ) -> GameFieldData {
        let mut field = GameFieldData::empty(player_id);
        field.sequence_id = sequence_id;
        field.compressor_steps = compressor_steps;
        (field.launch_color, field.next_color, field.new_next_color) = colors;
        field.total_attack_bubbles = total_attack_bubbles;
        for (index, color) in cells.into_iter().enumerate() {
            field.grid[index / FIELD_COLUMNS][index % FIELD_COLUMNS] = color;
        }
        field
    }
}

prop_compose! {
    fn preferences()(
        ints in (any::<i32>(), any::<i32>(), any::<i32>(), any::<i32>()),
        flags in (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()),
    ) -> Preferences {
        Preferences {
            collision: ints.0,
            difficulty: ints.1,
            game_mode: ints.2,
            target_mode: ints.3,
            compressor: flags.0,
            dont_rush_me: flags.1,
            fullscreen: flags.2,
            music_on: flags.3,
            sound_on: flags.4,
        }
    }
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        player().prop_map(|player_id| Message::JoinGame(JoinGame { player_id })),
        player().prop_map(|player_id| Message::StartGame(StartGame { player_id })),
        (player(), any::<u16>()).prop_map(|(player_id, sequence_id)| {
            Message::Rebroadcast(RebroadcastRequest {
                player_id,
                sequence_id,
            })
        }),
        preferences().prop_map(Message::SetPrefs),
        player_action().prop_map(Message::Action),
        game_field().prop_map(Message::GameField),
    ]
}

// ============================================================================
// Codec Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_message_survives_the_wire(message in message()) {
        let bytes = codec::encode(&message).unwrap();
        prop_assert_eq!(bytes.len(), 1 + message.message_type().payload_len());
        prop_assert_eq!(bytes[0], u8::from(message.message_type()));

        let decoded = codec::decode(&bytes).unwrap();
        // Compare bytes: NaN-free here, but -0.0 == 0.0 would hide a sign flip.
        prop_assert_eq!(codec::encode(&decoded).unwrap(), bytes);
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn prop_accepted_datagrams_are_canonical(
        bytes in prop::collection::vec(any::<u8>(), 0..=MAX_MESSAGE_LEN + 4),
    ) {
        if let Ok(message) = codec::decode(&bytes) {
            prop_assert_eq!(codec::encode(&message).unwrap(), bytes);
        }
    }

    #[test]
    fn prop_decoding_valid_tags_never_panics(
        tag in 1u8..=6,
        payload in prop::collection::vec(any::<u8>(), 0..=MAX_MESSAGE_LEN),
    ) {
        let mut bytes = vec![tag];
        bytes.extend(payload);
        let _ = codec::decode(&bytes);
    }

    #[test]
    fn prop_attack_bubble_count_matches_columns(action in player_action()) {
        let expected = action.attack_bubbles.iter().filter(|&&color| color != -1).count();
        prop_assert_eq!(action.attack_bubble_count(), expected);
        prop_assert!(action.attack_bubble_count() <= ATTACK_COLUMNS);
    }
}

// ============================================================================
// Action Stream Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_any_arrival_order_delivers_in_sequence(
        order in (1usize..64).prop_flat_map(|n| {
            Just((1..=n as u16).collect::<Vec<_>>()).prop_shuffle()
        }),
        duplicates in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let sync = synchronizer(PlayerId::One);
        let count = order.len();

        let mut arrivals = order.clone();
        for index in &duplicates {
            arrivals.push(*index.get(&order));
        }

        let mut delivered = Vec::new();
        for sequence_id in arrivals {
            let _ = sync.record_remote_action(remote_action(sequence_id));
            while let Some(action) = sync.next_remote_action() {
                delivered.push(action.sequence_id);
            }
        }

        let expected: Vec<u16> = (1..=count as u16).collect();
        prop_assert_eq!(delivered, expected);
        prop_assert_eq!(sync.pending_remote_len(), 0);
        prop_assert_eq!(sync.expected_remote_sequence(), count as u16 + 1);
    }

    #[test]
    fn prop_nothing_passes_a_gap(
        count in 2u16..48,
        missing_offset in any::<prop::sample::Index>(),
    ) {
        let missing = missing_offset.index(usize::from(count)) as u16 + 1;
        let sync = synchronizer(PlayerId::One);

        for sequence_id in (1..=count).rev().filter(|&id| id != missing) {
            prop_assert_eq!(
                sync.record_remote_action(remote_action(sequence_id)),
                RemoteOutcome::Accepted
            );
        }

        let ready = sync.drain_remote_ready();
        prop_assert_eq!(ready.len(), usize::from(missing - 1));
        prop_assert_eq!(sync.missing_remote_sequence(), Some(missing).filter(|&m| m < count));
        prop_assert!(sync.next_remote_action().is_none());

        prop_assert_eq!(
            sync.record_remote_action(remote_action(missing)),
            RemoteOutcome::Accepted
        );
        prop_assert_eq!(sync.drain_remote_ready().len(), usize::from(count - missing + 1));
    }

    #[test]
    fn prop_small_stream_recovers_after_overflow(
        capacity in 1usize..8,
        order in (1usize..40).prop_flat_map(|n| {
            Just((1..=n as u16).collect::<Vec<_>>()).prop_shuffle()
        }),
    ) {
        let sync = synchronizer(PlayerId::One).with_stream_capacity(capacity);
        let count = order.len();
        let mut delivered = Vec::new();
        let mut refused = Vec::new();

        for sequence_id in order {
            if sync.record_remote_action(remote_action(sequence_id)) == RemoteOutcome::Overflow {
                refused.push(sequence_id);
            }
            delivered.extend(sync.drain_remote_ready().iter().map(|a| a.sequence_id));
            prop_assert!(sync.pending_remote_len() <= capacity);
        }

        // The peer resends what was refused, oldest first, until the stream drains.
        for _ in 0..count {
            if refused.is_empty() {
                break;
            }
            refused.sort_unstable();
            let mut still_refused = Vec::new();
            for sequence_id in refused {
                if sync.record_remote_action(remote_action(sequence_id)) == RemoteOutcome::Overflow {
                    still_refused.push(sequence_id);
                }
                delivered.extend(sync.drain_remote_ready().iter().map(|a| a.sequence_id));
                prop_assert!(sync.pending_remote_len() <= capacity);
            }
            refused = still_refused;
        }

        let expected: Vec<u16> = (1..=count as u16).collect();
        prop_assert_eq!(delivered, expected);
        prop_assert_eq!(sync.pending_remote_len(), 0);
    }

    #[test]
    fn prop_local_ids_are_consecutive_and_never_zero(count in 1usize..300) {
        let sync = synchronizer(PlayerId::Two);
        let mut previous = 0u16;
        for _ in 0..count {
            let record = sync.record_local_action(PlayerAction::new(PlayerId::Two)).unwrap();
            prop_assert_ne!(record.sequence_id, 0);
            prop_assert_eq!(record.sequence_id, next_sequence_id(previous));
            previous = record.sequence_id;
        }
    }

    #[test]
    fn prop_next_sequence_id_skips_zero(id in any::<u16>()) {
        let next = next_sequence_id(id);
        prop_assert_ne!(next, 0);
        prop_assert!(sequence_precedes(id, next) || id == 0);
    }

    #[test]
    fn prop_precedes_is_asymmetric(a in any::<u16>(), b in any::<u16>()) {
        prop_assert!(!(sequence_precedes(a, b) && sequence_precedes(b, a)));
        prop_assert!(!sequence_precedes(a, a));
    }
}
