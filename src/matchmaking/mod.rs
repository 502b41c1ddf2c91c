//! Casual matchmaking
//!
//! A single waiting slot: the first seeker parks in it, the second compatible
//! seeker pairs with them into a fresh room. Vs-AI requests bypass the slot
//! entirely. Identity for self-match prevention is the user id when present,
//! the session id otherwise.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::game::room::{MatchConfig, MatchOutcome};
use crate::game::RoomRegistry;
use crate::ws::protocol::{AiDifficulty, MatchMode, ServerMsg, Side};

/// One connected seeker, as matchmaking sees them
#[derive(Debug, Clone)]
pub struct Participant {
    pub session_id: Uuid,
    pub user_id: Option<i64>,
    pub display_name: String,
}

impl Participant {
    /// Identity used for self-match and duplicate-queue checks
    fn identity(&self) -> MatchIdentity {
        match self.user_id {
            Some(uid) => MatchIdentity::User(uid),
            None => MatchIdentity::Session(self.session_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchIdentity {
    User(i64),
    Session(Uuid),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JoinOptions {
    pub vs_ai: bool,
    pub difficulty: AiDifficulty,
}

/// What the caller should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchmakingReply {
    /// Parked in the waiting slot
    Queued,
    /// A room exists; join it on the given side
    Matched {
        room_id: Uuid,
        side: Side,
        opponent_label: Option<String>,
    },
}

struct WaitingSeeker {
    participant: Participant,
    notify: mpsc::UnboundedSender<ServerMsg>,
}

pub struct Matchmaker {
    registry: Arc<RoomRegistry>,
    outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    waiting: Mutex<Option<WaitingSeeker>>,
    score_limit: u32,
}

impl Matchmaker {
    pub fn new(
        registry: Arc<RoomRegistry>,
        outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
        score_limit: u32,
    ) -> Self {
        Self {
            registry,
            outcome_tx,
            waiting: Mutex::new(None),
            score_limit,
        }
    }

    /// Handle a find-match request. The reply tells the requesting session
    /// what happened; when a pair forms, the waiting seeker is informed
    /// through their notify channel.
    pub fn join(
        &self,
        participant: Participant,
        options: JoinOptions,
        notify: mpsc::UnboundedSender<ServerMsg>,
    ) -> MatchmakingReply {
        if options.vs_ai {
            let handle = self.registry.spawn_room(
                MatchConfig::vs_ai(self.score_limit, options.difficulty),
                self.outcome_tx.clone(),
            );
            info!(
                room_id = %handle.id,
                user_id = ?participant.user_id,
                difficulty = ?options.difficulty,
                "Spawned vs-AI room"
            );
            return MatchmakingReply::Matched {
                room_id: handle.id,
                side: Side::Left,
                opponent_label: Some(format!("AI ({})", options.difficulty.label())),
            };
        }

        let mut slot = self.waiting.lock();

        match slot.take() {
            None => {
                *slot = Some(WaitingSeeker {
                    participant,
                    notify,
                });
                MatchmakingReply::Queued
            }
            Some(waiter) if waiter.participant.identity() == participant.identity() => {
                // Same person asking again; keep them parked
                *slot = Some(WaitingSeeker {
                    participant,
                    notify,
                });
                MatchmakingReply::Queued
            }
            Some(waiter) => {
                let handle = self
                    .registry
                    .spawn_room(MatchConfig::casual(self.score_limit), self.outcome_tx.clone());

                info!(
                    room_id = %handle.id,
                    left = ?waiter.participant.user_id,
                    right = ?participant.user_id,
                    "Paired casual match"
                );

                let _ = waiter.notify.send(ServerMsg::MatchFound {
                    room_id: handle.id,
                    side: Side::Left,
                    mode: MatchMode::Casual,
                    opponent_label: Some(participant.display_name.clone()),
                });

                MatchmakingReply::Matched {
                    room_id: handle.id,
                    side: Side::Right,
                    opponent_label: Some(waiter.participant.display_name.clone()),
                }
            }
        }
    }

    /// Drop the waiting slot if this session holds it
    pub fn leave(&self, session_id: Uuid) {
        let mut slot = self.waiting.lock();
        if slot
            .as_ref()
            .map(|w| w.participant.session_id == session_id)
            .unwrap_or(false)
        {
            *slot = None;
            info!(session_id = %session_id, "Seeker left the queue");
        }
    }

    #[cfg(test)]
    fn waiting_session(&self) -> Option<Uuid> {
        self.waiting.lock().as_ref().map(|w| w.participant.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeker(user_id: Option<i64>, name: &str) -> Participant {
        Participant {
            session_id: Uuid::new_v4(),
            user_id,
            display_name: name.to_string(),
        }
    }

    fn matchmaker() -> (Matchmaker, mpsc::UnboundedReceiver<MatchOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Matchmaker::new(Arc::new(RoomRegistry::new()), tx, 5), rx)
    }

    #[tokio::test]
    async fn first_seeker_queues() {
        let (mm, _outcomes) = matchmaker();
        let (notify, _rx) = mpsc::unbounded_channel();

        let reply = mm.join(seeker(Some(1), "alice"), JoinOptions::default(), notify);
        assert_eq!(reply, MatchmakingReply::Queued);
        assert!(mm.waiting_session().is_some());
    }

    #[tokio::test]
    async fn same_user_cannot_match_themselves() {
        let (mm, _outcomes) = matchmaker();
        let (notify_a, _ra) = mpsc::unbounded_channel();
        let (notify_b, _rb) = mpsc::unbounded_channel();

        let first = seeker(Some(1), "alice");
        mm.join(first, JoinOptions::default(), notify_a);

        // Same user id from a different session reconnecting
        let again = seeker(Some(1), "alice");
        let reply = mm.join(again.clone(), JoinOptions::default(), notify_b);
        assert_eq!(reply, MatchmakingReply::Queued);
        assert_eq!(mm.waiting_session(), Some(again.session_id));
    }

    #[tokio::test]
    async fn second_seeker_pairs_and_waiter_is_notified() {
        let (mm, _outcomes) = matchmaker();
        let (notify_a, mut rx_a) = mpsc::unbounded_channel();
        let (notify_b, _rb) = mpsc::unbounded_channel();

        mm.join(seeker(Some(1), "alice"), JoinOptions::default(), notify_a);
        let reply = mm.join(seeker(Some(2), "bob"), JoinOptions::default(), notify_b);

        let MatchmakingReply::Matched { room_id, side, .. } = reply else {
            panic!("second seeker should match");
        };
        assert_eq!(side, Side::Right);
        assert!(mm.waiting_session().is_none());

        let msg = rx_a.try_recv().expect("waiter notified");
        match msg {
            ServerMsg::MatchFound {
                room_id: waiter_room,
                side: waiter_side,
                ..
            } => {
                assert_eq!(waiter_room, room_id);
                assert_eq!(waiter_side, Side::Left);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn guests_pair_by_session_identity() {
        let (mm, _outcomes) = matchmaker();
        let (notify_a, _ra) = mpsc::unbounded_channel();
        let (notify_b, _rb) = mpsc::unbounded_channel();

        mm.join(seeker(None, "guest-1"), JoinOptions::default(), notify_a);
        let reply = mm.join(seeker(None, "guest-2"), JoinOptions::default(), notify_b);
        assert!(matches!(reply, MatchmakingReply::Matched { .. }));
    }

    #[tokio::test]
    async fn vs_ai_matches_immediately_without_queueing() {
        let (mm, _outcomes) = matchmaker();
        let (notify, _rx) = mpsc::unbounded_channel();

        let reply = mm.join(
            seeker(None, "guest"),
            JoinOptions {
                vs_ai: true,
                difficulty: AiDifficulty::Hard,
            },
            notify,
        );
        assert!(matches!(
            reply,
            MatchmakingReply::Matched {
                side: Side::Left,
                ..
            }
        ));
        assert!(mm.waiting_session().is_none());
    }

    #[tokio::test]
    async fn leave_clears_only_the_owning_session() {
        let (mm, _outcomes) = matchmaker();
        let (notify, _rx) = mpsc::unbounded_channel();

        let alice = seeker(Some(1), "alice");
        let alice_session = alice.session_id;
        mm.join(alice, JoinOptions::default(), notify);

        mm.leave(Uuid::new_v4());
        assert_eq!(mm.waiting_session(), Some(alice_session));

        mm.leave(alice_session);
        assert!(mm.waiting_session().is_none());
    }
}
