//! Tournament orchestration
//!
//! Bridges the bracket store and the live rooms: hands players a room for
//! their next bracket match, and feeds finished-room outcomes back into the
//! bracket. Outcomes arrive on a single channel and are processed one at a
//! time, so two rooms of the same tournament can never race their reports.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::room::{MatchConfig, MatchOutcome, TournamentBinding};
use crate::game::RoomRegistry;
use crate::ws::protocol::Side;

use super::store::{
    AdvanceSummary, MatchStatus, Tournament, TournamentMatch, TournamentPlayer, TournamentStore,
};
use super::TournamentError;

/// Everything a client needs to render one tournament
#[derive(Debug, Clone, Serialize)]
pub struct TournamentOverview {
    pub tournament: Tournament,
    pub players: Vec<TournamentPlayer>,
    pub matches: Vec<TournamentMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BracketRound {
    pub round: u32,
    pub matches: Vec<TournamentMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub display_name: String,
    pub wins: u32,
    pub champion: bool,
}

/// Admission to a live bracket-match room. The side mirrors the player's
/// slot in the bracket row, so reported scores line up with it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MatchTicket {
    pub room_id: Uuid,
    pub match_id: i64,
    pub side: Side,
}

pub struct TournamentService {
    store: TournamentStore,
    registry: Arc<RoomRegistry>,
    outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    /// Live room per bracket match, dropped when the result lands
    match_rooms: DashMap<i64, Uuid>,
    /// First user to request a seat per match; the second distinct one
    /// flips the match to running
    first_seat: DashMap<i64, i64>,
    score_limit: u32,
}

impl TournamentService {
    pub fn new(
        registry: Arc<RoomRegistry>,
        outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
        score_limit: u32,
    ) -> Self {
        Self {
            store: TournamentStore::new(),
            registry,
            outcome_tx,
            match_rooms: DashMap::new(),
            first_seat: DashMap::new(),
            score_limit,
        }
    }

    pub fn create(
        &self,
        name: String,
        creator_id: i64,
        max_players: u32,
    ) -> Tournament {
        self.store.create(name, creator_id, max_players)
    }

    pub fn list(&self) -> Vec<Tournament> {
        self.store.list()
    }

    pub fn count(&self) -> usize {
        self.store.list().len()
    }

    pub fn join(
        &self,
        id: Uuid,
        user_id: i64,
        display_name: String,
    ) -> Result<(), TournamentError> {
        self.store.join(id, user_id, display_name)
    }

    /// Start the bracket, then immediately resolve the byes an uneven
    /// field produces.
    pub fn start(&self, id: Uuid, requester_id: i64) -> Result<(), TournamentError> {
        self.store.start(id, requester_id)?;
        let resolved = self.store.resolve_byes(id, Utc::now())?;
        if resolved > 0 {
            info!(tournament_id = %id, byes = resolved, "Opening byes resolved");
        }
        Ok(())
    }

    /// Maintenance sweep over one tournament
    pub fn advance(&self, id: Uuid) -> Result<AdvanceSummary, TournamentError> {
        self.store.advance_state(id, Utc::now())
    }

    pub fn next_match(
        &self,
        id: Uuid,
        user_id: i64,
    ) -> Result<TournamentMatch, TournamentError> {
        self.store.next_match(id, user_id)
    }

    pub fn overview(&self, id: Uuid) -> Result<TournamentOverview, TournamentError> {
        Ok(TournamentOverview {
            tournament: self.store.get(id)?,
            players: self.store.players(id)?,
            matches: self.store.matches(id)?,
        })
    }

    /// Matches grouped by round, each round ordered by bracket position
    pub fn bracket_view(&self, id: Uuid) -> Result<Vec<BracketRound>, TournamentError> {
        let mut by_round: HashMap<u32, Vec<TournamentMatch>> = HashMap::new();
        for m in self.store.matches(id)? {
            by_round.entry(m.round).or_default().push(m);
        }

        let mut rounds: Vec<BracketRound> = by_round
            .into_iter()
            .map(|(round, mut matches)| {
                matches.sort_by_key(|m| m.match_index);
                BracketRound { round, matches }
            })
            .collect();
        rounds.sort_by_key(|r| r.round);
        Ok(rounds)
    }

    /// Win counts per player, champion first
    pub fn leaderboard(&self, id: Uuid) -> Result<Vec<LeaderboardEntry>, TournamentError> {
        let tournament = self.store.get(id)?;
        let players = self.store.players(id)?;
        let matches = self.store.matches(id)?;

        let mut wins: HashMap<i64, u32> = HashMap::new();
        for m in &matches {
            if let Some(winner) = m.winner_id {
                *wins.entry(winner).or_default() += 1;
            }
        }

        let mut entries: Vec<LeaderboardEntry> = players
            .iter()
            .map(|p| LeaderboardEntry {
                user_id: p.user_id,
                display_name: p.display_name.clone(),
                wins: wins.get(&p.user_id).copied().unwrap_or(0),
                champion: tournament.winner_id == Some(p.user_id),
            })
            .collect();
        entries.sort_by(|a, b| {
            (b.champion, b.wins)
                .cmp(&(a.champion, a.wins))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(entries)
    }

    /// Admit a player to the room for their next bracket match, spawning
    /// the room on first request. Only matches with both sides assigned
    /// are playable; one-sided matches are still waiting on a feeder.
    pub fn join_match(
        &self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<MatchTicket, TournamentError> {
        let m = self.store.next_match(tournament_id, user_id)?;
        if m.left_player.is_none() || m.right_player.is_none() {
            return Err(TournamentError::MatchNotReady);
        }
        let side = if m.left_player == Some(user_id) {
            Side::Left
        } else {
            Side::Right
        };

        let room_id = self.room_for(tournament_id, m.id);

        // The second distinct player asking for a seat means the match is
        // actually being contested. The entry op is atomic per key, so two
        // racing joins cannot both see an empty slot.
        let contested = match self.first_seat.entry(m.id) {
            Entry::Vacant(slot) => {
                slot.insert(user_id);
                false
            }
            Entry::Occupied(seat) => *seat.get() != user_id,
        };
        if contested && m.status == MatchStatus::Pending {
            self.store.mark_match_running(tournament_id, m.id)?;
        }

        Ok(MatchTicket {
            room_id,
            match_id: m.id,
            side,
        })
    }

    /// Locate the live room for a bracket match, respawning if the previous
    /// one already shut down without reporting.
    fn room_for(&self, tournament_id: Uuid, match_id: i64) -> Uuid {
        if let Some(existing) = self.match_rooms.get(&match_id) {
            let room_id = *existing.value();
            if self.registry.get(&room_id).is_some() {
                return room_id;
            }
        }

        let binding = TournamentBinding {
            tournament_id,
            match_id,
        };
        let handle = self.registry.spawn_room(
            MatchConfig::tournament(self.score_limit, binding),
            self.outcome_tx.clone(),
        );
        self.match_rooms.insert(match_id, handle.id);

        info!(
            tournament_id = %tournament_id,
            match_id,
            room_id = %handle.id,
            "Spawned tournament match room"
        );
        handle.id
    }

    /// Ingest one finished-room outcome. Stale or malformed reports are
    /// logged and dropped rather than failing the pipeline.
    pub fn handle_report(&self, outcome: &MatchOutcome) {
        let Some(binding) = outcome.tournament else {
            return;
        };

        self.match_rooms.remove(&binding.match_id);
        self.first_seat.remove(&binding.match_id);

        let Some(winner_id) = outcome.winner_user_id else {
            warn!(
                tournament_id = %binding.tournament_id,
                match_id = binding.match_id,
                "Outcome without a winner user id, dropping"
            );
            return;
        };

        let (left_score, right_score) = (outcome.score.left, outcome.score.right);
        match self.store.apply_report(
            binding.tournament_id,
            binding.match_id,
            winner_id,
            left_score,
            right_score,
        ) {
            Ok(()) => {}
            Err(TournamentError::AlreadyFinished) => {
                warn!(
                    tournament_id = %binding.tournament_id,
                    match_id = binding.match_id,
                    "Duplicate result for a finished match, dropping"
                );
            }
            Err(err) => {
                warn!(
                    tournament_id = %binding.tournament_id,
                    match_id = binding.match_id,
                    error = %err,
                    "Failed to record match result"
                );
            }
        }
    }
}
