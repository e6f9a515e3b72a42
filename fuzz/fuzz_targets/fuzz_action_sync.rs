//! Fuzz target for the action synchronizer.
//!
//! Drives one synchronizer with arbitrary sequences of local records, remote arrivals,
//! drains and resets, and checks what the game loop would observe.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary operation sequences
//! - Remote actions are handed out with consecutive sequence ids
//! - Pending remote actions never exceed the stream capacity
//! - Local sequence ids are never 0

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use bubble_netplay::{
    next_sequence_id, ActionOutbound, ActionSynchronizer, PlayerAction, PlayerId,
};
use libfuzzer_sys::fuzz_target;

const STREAM_CAPACITY: usize = 32;

struct Discard;

impl ActionOutbound for Discard {
    fn transmit(&self, _datagram: Vec<u8>) -> bool {
        true
    }
}

/// Operations the session performs on a synchronizer
#[derive(Debug, Arbitrary)]
enum SyncOp {
    /// The local player did something
    RecordLocal { launch: bool, aim: i8 },
    /// A datagram from the peer carried this action
    ReceiveRemote { sequence_id: u16, from_host: bool },
    /// The game loop consumes one remote action
    NextRemote,
    /// The game loop consumes everything ready
    DrainRemote,
    /// The game loop consumes one local action
    NextLocal,
    /// The peer asked for a local action again
    Retransmit { sequence_id: u16 },
    /// A new round starts
    Initialize,
}

fuzz_target!(|ops: Vec<SyncOp>| {
    let sync = ActionSynchronizer::new(PlayerId::One, Arc::new(Discard))
        .with_stream_capacity(STREAM_CAPACITY)
        .with_history_capacity(8);

    // The id the next delivered remote action must carry.
    let mut expected_remote: u16 = 1;

    for op in ops {
        match op {
            SyncOp::RecordLocal { launch, aim } => {
                let mut action = PlayerAction::new(PlayerId::One);
                action.launch = launch;
                action.aim_position = f64::from(aim) / 128.0;
                if let Ok(record) = sync.record_local_action(action) {
                    assert_ne!(record.sequence_id, 0);
                }
            },
            SyncOp::ReceiveRemote {
                sequence_id,
                from_host,
            } => {
                let player = if from_host { PlayerId::One } else { PlayerId::Two };
                let mut action = PlayerAction::new(player);
                action.sequence_id = sequence_id;
                let _ = sync.record_remote_action(action);
            },
            SyncOp::NextRemote => {
                if let Some(action) = sync.next_remote_action() {
                    assert_eq!(action.sequence_id, expected_remote);
                    assert_eq!(action.player_id, PlayerId::Two);
                    expected_remote = next_sequence_id(expected_remote);
                }
            },
            SyncOp::DrainRemote => {
                for action in sync.drain_remote_ready() {
                    assert_eq!(action.sequence_id, expected_remote);
                    expected_remote = next_sequence_id(expected_remote);
                }
            },
            SyncOp::NextLocal => {
                let _ = sync.next_local_action();
            },
            SyncOp::Retransmit { sequence_id } => {
                let _ = sync.retransmit(sequence_id);
            },
            SyncOp::Initialize => {
                sync.initialize();
                expected_remote = 1;
            },
        }

        assert!(sync.pending_remote_len() <= STREAM_CAPACITY);
        assert_eq!(sync.expected_remote_sequence(), expected_remote);
    }
});
