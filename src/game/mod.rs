//! Game simulation modules

pub mod ai;
pub mod physics;
pub mod registry;
pub mod room;
pub mod snapshot;

pub use registry::RoomRegistry;

use crate::ws::protocol::{MatchEndInfo, MatchMode, Side, SidePlayers, StateSnapshot};

/// Paddle input state for a single side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaddleInput {
    pub up: bool,
    pub down: bool,
}

/// A value held once per side
#[derive(Debug, Clone, Copy, Default)]
pub struct PerSide<T> {
    pub left: T,
    pub right: T,
}

impl<T> PerSide<T> {
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Events broadcast by a room to subscribed sessions.
/// The WebSocket layer maps these onto wire messages, personalizing
/// `Start` with the receiver's own side.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Ready {
        start_at: u64,
        players: SidePlayers,
    },
    Start {
        players: SidePlayers,
        mode: MatchMode,
    },
    Snapshot(StateSnapshot),
    End(MatchEndInfo),
}
