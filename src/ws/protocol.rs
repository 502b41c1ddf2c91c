//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which half of the field a participant occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Difficulty label for the scripted opponent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiDifficulty {
    Easy,
    Medium,
    Hard,
}

impl AiDifficulty {
    pub fn label(self) -> &'static str {
        match self {
            AiDifficulty::Easy => "easy",
            AiDifficulty::Medium => "medium",
            AiDifficulty::Hard => "hard",
        }
    }
}

impl Default for AiDifficulty {
    fn default() -> Self {
        Self::Medium
    }
}

/// How a match was arranged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Casual,
    VsAi,
    Tournament,
}

/// Room lifecycle state, broadcast in every snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// Required participants are not both present and connected
    Waiting,
    /// Both sides ready, serve delay elapsing
    Starting,
    /// Physics running, inputs applied
    Playing,
    /// Point scored, next serve scheduled
    Paused,
    /// Terminal
    Finished,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Score limit reached through play
    Score,
    /// Opponent disconnected and did not return within the grace period
    Disconnect,
    /// Tournament opponent never joined
    Forfeit,
}

/// Ball position and velocity
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BallState {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// One paddle: vertical offset of the top edge, fixed height
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaddleState {
    pub offset: f32,
    pub height: f32,
}

impl PaddleState {
    /// Vertical center of the paddle
    pub fn center(&self) -> f32 {
        self.offset + self.height / 2.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaddlePair {
    pub left: PaddleState,
    pub right: PaddleState,
}

/// Score counters, monotonically increasing until match end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreState {
    pub left: u32,
    pub right: u32,
}

impl ScoreState {
    pub fn for_side(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Player info carried in snapshots and lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerBrief {
    /// Null for guests and the scripted opponent
    pub user_id: Option<i64>,
    pub display_name: String,
    pub avatar: Option<String>,
    pub side: Side,
    pub is_ai: bool,
    pub connected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidePlayers {
    pub left: Option<PlayerBrief>,
    pub right: Option<PlayerBrief>,
}

impl SidePlayers {
    pub fn for_side(&self, side: Side) -> Option<&PlayerBrief> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub room_id: Uuid,
    /// Unix milliseconds at build time
    pub timestamp: u64,
    pub tournament_id: Option<Uuid>,
}

/// Periodic state snapshot (also sent while waiting, with frozen positions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: RoomPhase,
    pub ball: BallState,
    pub paddles: PaddlePair,
    pub score: ScoreState,
    pub players: SidePlayers,
    pub meta: SnapshotMeta,
}

/// Terminal match report sent exactly once per room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEndInfo {
    pub winner_side: Side,
    pub score: ScoreState,
    pub reason: EndReason,
    pub players: SidePlayers,
    pub tournament_id: Option<Uuid>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter casual matchmaking, or request an immediate match vs the
    /// scripted opponent
    FindMatch {
        #[serde(default)]
        vs_ai: bool,
        difficulty: Option<AiDifficulty>,
    },

    /// Join (or rejoin) the room hosting the caller's current tournament match
    JoinTournamentMatch { tournament_id: Uuid },

    /// Join a specific room, as a player (reconnect) or spectator
    JoinRoom {
        room_id: Uuid,
        #[serde(default)]
        spectate: bool,
    },

    /// Paddle input for the current tick
    Input { up: bool, down: bool },

    /// Leave the current match or matchmaking queue
    Leave,

    /// Ping for latency measurement
    Ping { t: u64 },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { session_id: Uuid, server_time: u64 },

    /// Held in the casual matchmaking slot, waiting for an opponent
    Queued,

    /// A room has been allocated for this session
    MatchFound {
        room_id: Uuid,
        side: Side,
        mode: MatchMode,
        /// Display label of the opponent when already known (vs-AI matches)
        opponent_label: Option<String>,
    },

    /// Confirmation of a room join; side is null for spectators
    RoomJoined { room_id: Uuid, side: Option<Side> },

    /// Both sides present, serve scheduled
    MatchReady { start_at: u64, players: SidePlayers },

    /// First serve is away
    MatchStart {
        you: PlayerBrief,
        opponent: PlayerBrief,
        mode: MatchMode,
    },

    /// Periodic state snapshot
    Snapshot(StateSnapshot),

    /// Match over
    MatchEnd(MatchEndInfo),

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong { t: u64 },
}
