//! The message shapes two peers exchange.
//!
//! Field order in every struct is the wire order; see [`codec`](crate::network::codec).

use serde::{Deserialize, Serialize};

use crate::{NetplayError, PlayerId, NO_BUBBLE};

/// Number of attack-bubble columns carried by a [`PlayerAction`].
pub const ATTACK_COLUMNS: usize = 15;
/// Rows of a [`GameFieldData`] grid.
pub const FIELD_ROWS: usize = 8;
/// Columns of a [`GameFieldData`] grid.
pub const FIELD_COLUMNS: usize = 12;

/// The one-byte tag that precedes every payload on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    /// A peer asks to join the session.
    JoinGame = 1,
    /// Session preferences, sent by player one.
    SetPrefs = 2,
    /// A peer is ready and starts playing.
    StartGame = 3,
    /// A peer asks for one of our actions again.
    Rebroadcast = 4,
    /// One player action.
    Action = 5,
    /// A full board snapshot.
    GameField = 6,
}

impl MessageType {
    /// Size of this type's payload, excluding the tag byte.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            Self::JoinGame | Self::StartGame => 1,
            Self::Rebroadcast => 3,
            Self::SetPrefs => 21,
            Self::Action => 36,
            Self::GameField => 105,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(message_type: MessageType) -> Self {
        message_type as Self
    }
}

impl TryFrom<u8> for MessageType {
    type Error = NetplayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::JoinGame),
            2 => Ok(Self::SetPrefs),
            3 => Ok(Self::StartGame),
            4 => Ok(Self::Rebroadcast),
            5 => Ok(Self::Action),
            6 => Ok(Self::GameField),
            other => Err(NetplayError::InvalidRequest {
                info: format!("unknown message type {other}"),
            }),
        }
    }
}

/// What the game loop should do with an action's launcher input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActionCommand {
    /// Fire the launch bubble.
    Launch,
    /// Swap the launch bubble with the next one.
    Swap,
    /// Only aim (and possibly compress).
    Aim,
}

/// One discrete input decision by one player.
///
/// `sequence_id` is assigned by the [`ActionSynchronizer`](crate::ActionSynchronizer) when
/// the action is recorded; two actions of the same player with the same id are duplicates.
///
/// `launch` and `swap` are independent flags, but only one of them is honored per
/// action; see [`command`](Self::command).
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerAction {
    /// The player that produced the action.
    pub player_id: PlayerId,
    /// Position of the action in its player's stream.
    pub sequence_id: u16,
    /// The compressor moves down one step.
    pub compress: bool,
    /// The launch bubble is fired.
    pub launch: bool,
    /// Launch and next bubble are swapped.
    pub swap: bool,
    /// Color of the launched bubble, [`NO_BUBBLE`] if none.
    pub launch_color: i8,
    /// Color of the bubble waiting next.
    pub next_color: i8,
    /// Color of the bubble that replaces the next one.
    pub new_next_color: i8,
    /// Attack bubbles added to the opponent by this action.
    pub add_attack_bubbles: i16,
    /// Attack bubbles pending for this player after the action.
    pub total_attack_bubbles: i16,
    /// Attack bubble color per column, [`NO_BUBBLE`] where there is none.
    pub attack_bubbles: [i8; ATTACK_COLUMNS],
    /// Launcher aim.
    pub aim_position: f64,
}

impl PlayerAction {
    /// An action of `player_id` that does nothing: no flags, all colors unset, aim at `0.0`.
    #[must_use]
    pub const fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            sequence_id: 0,
            compress: false,
            launch: false,
            swap: false,
            launch_color: NO_BUBBLE,
            next_color: NO_BUBBLE,
            new_next_color: NO_BUBBLE,
            add_attack_bubbles: 0,
            total_attack_bubbles: 0,
            attack_bubbles: [NO_BUBBLE; ATTACK_COLUMNS],
            aim_position: 0.0,
        }
    }

    /// The launcher command this action carries. `launch` wins over `swap` when both are set.
    ///
    /// ```
    /// use bubble_netplay::{ActionCommand, PlayerAction, PlayerId};
    ///
    /// let mut action = PlayerAction::new(PlayerId::Two);
    /// action.swap = true;
    /// assert_eq!(action.command(), ActionCommand::Swap);
    /// action.launch = true;
    /// assert_eq!(action.command(), ActionCommand::Launch);
    /// ```
    #[must_use]
    pub const fn command(&self) -> ActionCommand {
        if self.launch {
            ActionCommand::Launch
        } else if self.swap {
            ActionCommand::Swap
        } else {
            ActionCommand::Aim
        }
    }

    /// Number of columns that carry an attack bubble.
    #[must_use]
    pub fn attack_bubble_count(&self) -> usize {
        self.attack_bubbles
            .iter()
            .filter(|&&color| color != NO_BUBBLE)
            .count()
    }
}

impl Default for PlayerAction {
    fn default() -> Self {
        Self::new(PlayerId::default())
    }
}

/// A full snapshot of one player's board, used to resynchronize a peer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFieldData {
    /// The player whose board this is.
    pub player_id: PlayerId,
    /// The last action id applied to this board.
    pub sequence_id: u16,
    /// How far the compressor has come down.
    pub compressor_steps: u8,
    /// Color of the bubble on the launcher.
    pub launch_color: i8,
    /// Color of the bubble waiting next.
    pub next_color: i8,
    /// Color of the bubble that replaces the next one.
    pub new_next_color: i8,
    /// Attack bubbles pending for this player.
    pub total_attack_bubbles: i16,
    /// Cell colors, row-major; [`NO_BUBBLE`] marks an empty cell.
    pub grid: [[i8; FIELD_COLUMNS]; FIELD_ROWS],
}

impl GameFieldData {
    /// An empty board for `player_id`.
    #[must_use]
    pub const fn empty(player_id: PlayerId) -> Self {
        Self {
            player_id,
            sequence_id: 0,
            compressor_steps: 0,
            launch_color: NO_BUBBLE,
            next_color: NO_BUBBLE,
            new_next_color: NO_BUBBLE,
            total_attack_bubbles: 0,
            grid: [[NO_BUBBLE; FIELD_COLUMNS]; FIELD_ROWS],
        }
    }

    /// The color at `(row, column)`, `None` for an empty cell or out-of-range coordinates.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<i8> {
        self.grid
            .get(row)
            .and_then(|cells| cells.get(column))
            .copied()
            .filter(|&color| color != NO_BUBBLE)
    }

    /// Sets the color at `(row, column)`. Returns `false` for out-of-range coordinates.
    pub fn set_cell(&mut self, row: usize, column: usize, color: i8) -> bool {
        match self.grid.get_mut(row).and_then(|cells| cells.get_mut(column)) {
            Some(cell) => {
                *cell = color;
                true
            },
            None => false,
        }
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn occupied_cells(&self) -> usize {
        self.grid
            .iter()
            .flatten()
            .filter(|&&color| color != NO_BUBBLE)
            .count()
    }
}

/// The game options both peers must agree on. Player one sends them, player two adopts them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Preferences {
    /// Collision threshold between a flying bubble and the board.
    pub collision: i32,
    /// Whether the compressor is enabled.
    pub compressor: bool,
    /// Difficulty level.
    pub difficulty: i32,
    /// Disable the "hurry up" launch timer.
    pub dont_rush_me: bool,
    /// Fullscreen display.
    pub fullscreen: bool,
    /// Game mode.
    pub game_mode: i32,
    /// Music playback.
    pub music_on: bool,
    /// Sound effects.
    pub sound_on: bool,
    /// Aiming mode.
    pub target_mode: i32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            collision: 24,
            compressor: false,
            difficulty: 5,
            dont_rush_me: false,
            fullscreen: true,
            game_mode: 0,
            music_on: true,
            sound_on: true,
            target_mode: 0,
        }
    }
}

#[cfg(feature = "json")]
impl Preferences {
    /// Serializes the preferences as JSON.
    pub fn to_json(&self) -> Result<String, NetplayError> {
        serde_json::to_string_pretty(self).map_err(|e| NetplayError::SerializationError {
            context: e.to_string(),
        })
    }

    /// Parses preferences from JSON.
    pub fn from_json(json: &str) -> Result<Self, NetplayError> {
        serde_json::from_str(json).map_err(|e| NetplayError::SerializationError {
            context: e.to_string(),
        })
    }
}

/// Payload of [`MessageType::JoinGame`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinGame {
    /// The joining player.
    pub player_id: PlayerId,
}

/// Payload of [`MessageType::StartGame`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StartGame {
    /// The player that is ready.
    pub player_id: PlayerId,
}

/// Payload of [`MessageType::Rebroadcast`]: "please send your action `sequence_id` again".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RebroadcastRequest {
    /// The player asking; the request targets the other player's stream.
    pub player_id: PlayerId,
    /// The missing action.
    pub sequence_id: u16,
}

/// Any message of the protocol, one per datagram.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// See [`MessageType::JoinGame`].
    JoinGame(JoinGame),
    /// See [`MessageType::SetPrefs`].
    SetPrefs(Preferences),
    /// See [`MessageType::StartGame`].
    StartGame(StartGame),
    /// See [`MessageType::Rebroadcast`].
    Rebroadcast(RebroadcastRequest),
    /// See [`MessageType::Action`].
    Action(PlayerAction),
    /// See [`MessageType::GameField`].
    GameField(GameFieldData),
}

impl Message {
    /// The tag this message is sent with.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::JoinGame(_) => MessageType::JoinGame,
            Self::SetPrefs(_) => MessageType::SetPrefs,
            Self::StartGame(_) => MessageType::StartGame,
            Self::Rebroadcast(_) => MessageType::Rebroadcast,
            Self::Action(_) => MessageType::Action,
            Self::GameField(_) => MessageType::GameField,
        }
    }

    /// The player that sent the message. Preferences carry no sender.
    #[must_use]
    pub const fn sender(&self) -> Option<PlayerId> {
        match self {
            Self::JoinGame(join) => Some(join.player_id),
            Self::SetPrefs(_) => None,
            Self::StartGame(start) => Some(start.player_id),
            Self::Rebroadcast(request) => Some(request.player_id),
            Self::Action(action) => Some(action.player_id),
            Self::GameField(field) => Some(field.player_id),
        }
    }
}
