//! Room registry
//!
//! Global index of live rooms. Each room runs on its own task; the registry
//! holds a handle for routing joins and inputs, and drops it when the room's
//! task returns.

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use super::room::{MatchConfig, MatchOutcome, Room, RoomHandle};

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<Uuid, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room_id: &Uuid) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|entry| entry.clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Create a room, register it, and spawn its tick loop. The registry
    /// entry is removed when the loop returns, so a finished room stops
    /// being joinable as soon as its task exits.
    pub fn spawn_room(
        self: &Arc<Self>,
        config: MatchConfig,
        outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    ) -> RoomHandle {
        let room_id = Uuid::new_v4();
        let seed: u64 = rand::thread_rng().gen();

        let (room, handle) = Room::new(room_id, config, seed, outcome_tx);
        self.rooms.insert(room_id, handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            room.run().await;
            registry.rooms.remove(&room_id);
            info!(room_id = %room_id, "Room removed from registry");
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_rooms_are_resolvable_by_id() {
        let registry = Arc::new(RoomRegistry::new());
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = registry.spawn_room(MatchConfig::casual(5), tx);
        assert_eq!(registry.active_rooms(), 1);

        let found = registry.get(&handle.id).expect("room registered");
        assert_eq!(found.id, handle.id);
        assert!(registry.get(&Uuid::new_v4()).is_none());
    }
}
