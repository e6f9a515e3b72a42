//! Every datagram is one message:
//!
//! ```text
//! byte 0       : message type (1..6), see MessageType
//! bytes 1..N   : fixed-size payload of that type
//! ```
//!
//! Payloads are the message structs' fields in declaration order, encoded by bincode with a
//! fixed configuration: big-endian, fixed-width integers, `bool` as one `0`/`1` byte,
//! arrays without a length prefix. The resulting sizes are part of the protocol:
//!
//! | Payload             | Bytes |
//! |---------------------|-------|
//! | `JoinGame`          | 1     |
//! | `StartGame`         | 1     |
//! | `RebroadcastRequest`| 3     |
//! | `Preferences`       | 21    |
//! | `PlayerAction`      | 36    |
//! | `GameFieldData`     | 105   |
//!
//! Decoding checks lengths before touching bincode: a truncated buffer, trailing bytes
//! after the payload and out-of-range values (a `bool` byte of `2`, a player id of `3`)
//! are all errors.
//!
//! # Examples
//!
//! ```
//! use bubble_netplay::network::codec::{decode, encode};
//! use bubble_netplay::{Message, PlayerAction, PlayerId};
//!
//! let mut action = PlayerAction::new(PlayerId::One);
//! action.sequence_id = 7;
//! action.aim_position = -0.5;
//!
//! let bytes = encode(&Message::Action(action)).expect("encoding should succeed");
//! assert_eq!(bytes.len(), 37);
//! assert_eq!(bytes[0], 5);
//!
//! assert_eq!(decode(&bytes).expect("decoding should succeed"), Message::Action(action));
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

use crate::network::messages::{
    GameFieldData, JoinGame, Message, MessageType, PlayerAction, Preferences, RebroadcastRequest,
    StartGame,
};

// Big-endian so both peers agree regardless of host byte order; fixed-width so every
// payload has the size listed in the module docs.
fn config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Size of an encoded [`PlayerAction`] payload.
pub const ACTION_PAYLOAD_LEN: usize = MessageType::Action.payload_len();
/// Size of an encoded [`GameFieldData`] payload.
pub const GAME_FIELD_PAYLOAD_LEN: usize = MessageType::GameField.payload_len();
/// Size of an encoded [`Preferences`] payload.
pub const PREFERENCES_PAYLOAD_LEN: usize = MessageType::SetPrefs.payload_len();
/// The largest datagram the protocol produces, tag byte included.
pub const MAX_MESSAGE_LEN: usize = 1 + GAME_FIELD_PAYLOAD_LEN;

/// Errors that can occur during encoding or decoding.
///
/// Bincode errors are opaque, so their message is kept as a `String`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The datagram was empty; there is not even a tag byte.
    Empty,
    /// The tag byte is not a known [`MessageType`].
    UnknownMessageType {
        /// The tag that was read.
        tag: u8,
    },
    /// The buffer ends before the payload does.
    Truncated {
        /// The payload being decoded.
        message_type: MessageType,
        /// Bytes the payload needs.
        needed: usize,
        /// Bytes that were available from the payload's offset.
        available: usize,
    },
    /// The datagram continues after the payload.
    TrailingBytes {
        /// The payload that was decoded.
        message_type: MessageType,
        /// Total datagram length the type implies.
        expected: usize,
        /// Actual datagram length.
        actual: usize,
    },
    /// Bincode rejected the payload bytes (invalid `bool`, invalid player id, ...).
    DecodeError {
        /// The payload being decoded.
        message_type: MessageType,
        /// The underlying bincode error message.
        message: String,
    },
    /// Encoding failed or produced a payload of the wrong size.
    EncodeError {
        /// The payload being encoded.
        message_type: MessageType,
        /// What went wrong.
        message: String,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty datagram"),
            Self::UnknownMessageType { tag } => write!(f, "unknown message type {tag}"),
            Self::Truncated {
                message_type,
                needed,
                available,
            } => write!(
                f,
                "truncated {message_type:?} payload: needed {needed} bytes, only {available} available"
            ),
            Self::TrailingBytes {
                message_type,
                expected,
                actual,
            } => write!(
                f,
                "{message_type:?} datagram should be {expected} bytes, got {actual}"
            ),
            Self::DecodeError {
                message_type,
                message,
            } => write!(f, "decoding {message_type:?} payload failed: {message}"),
            Self::EncodeError {
                message_type,
                message,
            } => write!(f, "encoding {message_type:?} payload failed: {message}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A fixed-size message payload.
pub trait Payload: Serialize + DeserializeOwned {
    /// The tag this payload travels under.
    const MESSAGE_TYPE: MessageType;
    /// Encoded size in bytes.
    const ENCODED_LEN: usize = Self::MESSAGE_TYPE.payload_len();
}

impl Payload for JoinGame {
    const MESSAGE_TYPE: MessageType = MessageType::JoinGame;
}

impl Payload for Preferences {
    const MESSAGE_TYPE: MessageType = MessageType::SetPrefs;
}

impl Payload for StartGame {
    const MESSAGE_TYPE: MessageType = MessageType::StartGame;
}

impl Payload for RebroadcastRequest {
    const MESSAGE_TYPE: MessageType = MessageType::Rebroadcast;
}

impl Payload for PlayerAction {
    const MESSAGE_TYPE: MessageType = MessageType::Action;
}

impl Payload for GameFieldData {
    const MESSAGE_TYPE: MessageType = MessageType::GameField;
}

/// Encodes a payload without the tag byte.
pub fn encode_payload<P: Payload>(payload: &P) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(P::ENCODED_LEN);
    append_payload(payload, &mut buffer)?;
    Ok(buffer)
}

/// Appends an encoded payload to `buffer`.
fn append_payload<P: Payload>(payload: &P, buffer: &mut Vec<u8>) -> CodecResult<()> {
    let written = bincode::serde::encode_into_std_write(payload, buffer, config()).map_err(|e| {
        CodecError::EncodeError {
            message_type: P::MESSAGE_TYPE,
            message: e.to_string(),
        }
    })?;
    if written != P::ENCODED_LEN {
        return Err(CodecError::EncodeError {
            message_type: P::MESSAGE_TYPE,
            message: format!("wrote {written} bytes, layout is {}", P::ENCODED_LEN),
        });
    }
    Ok(())
}

/// Decodes a payload that starts at `offset` in `bytes`.
///
/// Bytes after the payload are not looked at; [`decode`] is the strict whole-datagram variant.
pub fn decode_payload<P: Payload>(bytes: &[u8], offset: usize) -> CodecResult<P> {
    let available = bytes.len().saturating_sub(offset);
    let slice = offset
        .checked_add(P::ENCODED_LEN)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(CodecError::Truncated {
            message_type: P::MESSAGE_TYPE,
            needed: P::ENCODED_LEN,
            available,
        })?;

    let (value, read) = bincode::serde::decode_from_slice::<P, _>(slice, config()).map_err(|e| {
        CodecError::DecodeError {
            message_type: P::MESSAGE_TYPE,
            message: e.to_string(),
        }
    })?;
    if read != P::ENCODED_LEN {
        return Err(CodecError::DecodeError {
            message_type: P::MESSAGE_TYPE,
            message: format!("consumed {read} bytes, layout is {}", P::ENCODED_LEN),
        });
    }
    Ok(value)
}

/// Encodes a message, tag byte first.
pub fn encode(message: &Message) -> CodecResult<Vec<u8>> {
    let message_type = message.message_type();
    let mut buffer = Vec::with_capacity(1 + message_type.payload_len());
    buffer.push(u8::from(message_type));
    match message {
        Message::JoinGame(join) => append_payload(join, &mut buffer)?,
        Message::SetPrefs(preferences) => append_payload(preferences, &mut buffer)?,
        Message::StartGame(start) => append_payload(start, &mut buffer)?,
        Message::Rebroadcast(request) => append_payload(request, &mut buffer)?,
        Message::Action(action) => append_payload(action, &mut buffer)?,
        Message::GameField(field) => append_payload(field, &mut buffer)?,
    }
    Ok(buffer)
}

/// Shorthand for `encode(&Message::Action(*action))`.
pub fn encode_action(action: &PlayerAction) -> CodecResult<Vec<u8>> {
    encode(&Message::Action(*action))
}

/// Decodes one whole datagram.
pub fn decode(bytes: &[u8]) -> CodecResult<Message> {
    let (&tag, _) = bytes.split_first().ok_or(CodecError::Empty)?;
    let message_type =
        MessageType::try_from(tag).map_err(|_| CodecError::UnknownMessageType { tag })?;

    let expected = 1 + message_type.payload_len();
    if bytes.len() > expected {
        return Err(CodecError::TrailingBytes {
            message_type,
            expected,
            actual: bytes.len(),
        });
    }

    let message = match message_type {
        MessageType::JoinGame => Message::JoinGame(decode_payload(bytes, 1)?),
        MessageType::SetPrefs => Message::SetPrefs(decode_payload(bytes, 1)?),
        MessageType::StartGame => Message::StartGame(decode_payload(bytes, 1)?),
        MessageType::Rebroadcast => Message::Rebroadcast(decode_payload(bytes, 1)?),
        MessageType::Action => Message::Action(decode_payload(bytes, 1)?),
        MessageType::GameField => Message::GameField(decode_payload(bytes, 1)?),
    };
    Ok(message)
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
    use crate::{PlayerId, NO_BUBBLE};

    fn sample_action() -> PlayerAction {
        let mut action = PlayerAction::new(PlayerId::Two);
        action.sequence_id = 0x0102;
        action.compress = true;
        action.launch = false;
        action.swap = true;
        action.launch_color = 3;
        action.next_color = 4;
        action.new_next_color = NO_BUBBLE;
        action.add_attack_bubbles = -2;
        action.total_attack_bubbles = 0x0304;
        action.attack_bubbles = [NO_BUBBLE; 15];
        action.attack_bubbles[0] = 7;
        action.aim_position = 1.0;
        action
    }

    #[test]
    fn payload_sizes_match_layout() {
        assert_eq!(encode_payload(&sample_action()).unwrap().len(), 36);
        assert_eq!(
            encode_payload(&GameFieldData::empty(PlayerId::One))
                .unwrap()
                .len(),
            105
        );
        assert_eq!(encode_payload(&Preferences::default()).unwrap().len(), 21);
        assert_eq!(
            encode_payload(&JoinGame {
                player_id: PlayerId::Two
            })
            .unwrap()
            .len(),
            1
        );
        assert_eq!(
            encode_payload(&RebroadcastRequest {
                player_id: PlayerId::One,
                sequence_id: 9
            })
            .unwrap()
            .len(),
            3
        );
    }

    #[test]
    fn action_byte_layout_is_big_endian() {
        let bytes = encode_payload(&sample_action()).unwrap();
        assert_eq!(bytes[0], 2); // player id
        assert_eq!(&bytes[1..3], &[0x01, 0x02]); // sequence id
        assert_eq!(&bytes[3..6], &[1, 0, 1]); // compress, launch, swap
        assert_eq!(&bytes[6..9], &[3, 4, 0xFF]); // colors
        assert_eq!(&bytes[9..11], &(-2i16).to_be_bytes());
        assert_eq!(&bytes[11..13], &[0x03, 0x04]);
        assert_eq!(bytes[13], 7);
        assert!(bytes[14..28].iter().all(|&b| b == 0xFF));
        assert_eq!(&bytes[28..36], &1.0f64.to_be_bytes());
    }

    #[test]
    fn preferences_ints_use_all_four_bytes() {
        let prefs = Preferences {
            collision: 0x0A0B_0C0D,
            ..Preferences::default()
        };
        let bytes = encode_payload(&prefs).unwrap();
        assert_eq!(&bytes[0..4], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(decode_payload::<Preferences>(&bytes, 0).unwrap(), prefs);
    }

    #[test]
    fn message_round_trips() {
        let mut field = GameFieldData::empty(PlayerId::One);
        field.grid[3][5] = 2;
        field.compressor_steps = 4;
        let messages = [
            Message::JoinGame(JoinGame {
                player_id: PlayerId::Two,
            }),
            Message::SetPrefs(Preferences::default()),
            Message::StartGame(StartGame {
                player_id: PlayerId::One,
            }),
            Message::Rebroadcast(RebroadcastRequest {
                player_id: PlayerId::Two,
                sequence_id: 65_535,
            }),
            Message::Action(sample_action()),
            Message::GameField(field),
        ];
        for message in messages {
            let bytes = encode(&message).unwrap();
            assert_eq!(bytes[0], u8::from(message.message_type()));
            assert_eq!(bytes.len(), 1 + message.message_type().payload_len());
            assert_eq!(decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn decode_payload_honors_offset() {
        let mut bytes = vec![0xAA, 0xBB];
        bytes.extend(encode_payload(&sample_action()).unwrap());
        assert_eq!(
            decode_payload::<PlayerAction>(&bytes, 2).unwrap(),
            sample_action()
        );
    }

    #[test]
    fn truncated_buffers_are_errors() {
        let bytes = encode_action(&sample_action()).unwrap();
        for len in 1..bytes.len() {
            match decode(&bytes[..len]) {
                Err(CodecError::Truncated {
                    message_type,
                    needed,
                    available,
                }) => {
                    assert_eq!(message_type, MessageType::Action);
                    assert_eq!(needed, 36);
                    assert_eq!(available, len - 1);
                },
                other => panic!("expected truncation at {len}, got {other:?}"),
            }
        }
        assert!(matches!(
            decode_payload::<PlayerAction>(&bytes, usize::MAX),
            Err(CodecError::Truncated { available: 0, .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_errors() {
        let mut bytes = encode_action(&sample_action()).unwrap();
        bytes.push(0);
        assert_eq!(
            decode(&bytes),
            Err(CodecError::TrailingBytes {
                message_type: MessageType::Action,
                expected: 37,
                actual: 38,
            })
        );
    }

    #[test]
    fn empty_and_unknown_datagrams_are_errors() {
        assert_eq!(decode(&[]), Err(CodecError::Empty));
        assert_eq!(
            decode(&[0, 1, 2]),
            Err(CodecError::UnknownMessageType { tag: 0 })
        );
        assert_eq!(
            decode(&[42]),
            Err(CodecError::UnknownMessageType { tag: 42 })
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut bytes = encode_action(&sample_action()).unwrap();
        bytes[1] = 3; // player id
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::DecodeError { .. })
        ));

        let mut bytes = encode_action(&sample_action()).unwrap();
        bytes[4] = 2; // compress flag
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::DecodeError { .. })
        ));
    }

    #[test]
    fn error_display_is_descriptive() {
        let err = CodecError::Truncated {
            message_type: MessageType::GameField,
            needed: 105,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "truncated GameField payload: needed 105 bytes, only 4 available"
        );
    }
}
