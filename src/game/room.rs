//! Match room state and authoritative tick loop
//!
//! A room is the single owner of one match's mutable state. External
//! mutations (join, input, disconnect) arrive as commands on the room's
//! channel and are applied between ticks, so a tick in progress and an
//! external event can never interleave. Every timer the room arms (serve
//! delay, disconnect grace, no-show forfeit) lives inside the room state as
//! a deadline checked by the tick loop, and dies with the room.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::util::time::{
    unix_millis, DISCONNECT_GRACE, NO_SHOW_TIMEOUT, SERVE_DELAY, SIMULATION_TPS, SNAPSHOT_TPS,
    TICK_DURATION_MICROS,
};
use crate::ws::protocol::{
    AiDifficulty, BallState, EndReason, MatchEndInfo, MatchMode, PaddlePair, PaddleState,
    PlayerBrief, RoomPhase, ScoreState, Side, SidePlayers, SnapshotMeta, StateSnapshot,
};

use super::ai::ScriptedOpponent;
use super::physics::{default_paddle, PhysicsKernel, FIELD_HEIGHT, FIELD_WIDTH};
use super::snapshot::SnapshotCadence;
use super::{PaddleInput, PerSide, RoomEvent};

/// Links a room to the bracket row it decides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TournamentBinding {
    pub tournament_id: Uuid,
    pub match_id: i64,
}

/// Immutable per-room configuration
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub score_limit: u32,
    pub allow_spectators: bool,
    pub ai: Option<AiDifficulty>,
    pub tournament: Option<TournamentBinding>,
}

impl MatchConfig {
    pub fn casual(score_limit: u32) -> Self {
        Self {
            score_limit,
            allow_spectators: true,
            ai: None,
            tournament: None,
        }
    }

    pub fn vs_ai(score_limit: u32, difficulty: AiDifficulty) -> Self {
        Self {
            score_limit,
            allow_spectators: true,
            ai: Some(difficulty),
            tournament: None,
        }
    }

    pub fn tournament(score_limit: u32, binding: TournamentBinding) -> Self {
        Self {
            score_limit,
            allow_spectators: true,
            ai: None,
            tournament: Some(binding),
        }
    }

    pub fn mode(&self) -> MatchMode {
        if self.tournament.is_some() {
            MatchMode::Tournament
        } else if self.ai.is_some() {
            MatchMode::VsAi
        } else {
            MatchMode::Casual
        }
    }
}

/// A seated participant (authoritative)
#[derive(Debug, Clone)]
pub struct RoomPlayer {
    pub session_id: Uuid,
    pub user_id: Option<i64>,
    pub display_name: String,
    pub avatar: Option<String>,
    pub side: Side,
    pub is_ai: bool,
    pub connected: bool,
    /// Pending disconnect-grace deadline, cleared on reconnect
    pub grace_deadline: Option<Instant>,
}

impl RoomPlayer {
    fn brief(&self) -> PlayerBrief {
        PlayerBrief {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
            side: self.side,
            is_ai: self.is_ai,
            connected: self.connected,
        }
    }
}

/// Room-level request failures, surfaced synchronously to the caller
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("Match already finished")]
    MatchFinished,

    #[error("Both sides are taken")]
    RoomFull,

    #[error("Requested side is taken")]
    SideTaken,

    #[error("Spectators are not allowed in this room")]
    SpectatorsDisabled,
}

/// Acknowledgment for a successful join; `side` is None for spectators
#[derive(Debug, Clone, Copy)]
pub struct JoinAck {
    pub side: Option<Side>,
    pub reconnected: bool,
}

/// External mutations, funneled through the room task
pub enum RoomCommand {
    Join {
        session_id: Uuid,
        user_id: Option<i64>,
        display_name: String,
        avatar: Option<String>,
        side: Option<Side>,
        spectate: bool,
        reply: oneshot::Sender<Result<JoinAck, RoomError>>,
    },
    Input {
        session_id: Uuid,
        input: PaddleInput,
    },
    Disconnect {
        session_id: Uuid,
    },
}

/// Terminal report emitted exactly once per room
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub room_id: Uuid,
    pub tournament: Option<TournamentBinding>,
    pub winner_side: Side,
    pub winner_user_id: Option<i64>,
    pub loser_user_id: Option<i64>,
    pub score: ScoreState,
    pub reason: EndReason,
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub events_tx: broadcast::Sender<RoomEvent>,
}

impl RoomHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events_tx.subscribe()
    }
}

/// The authoritative match room
pub struct Room {
    id: Uuid,
    config: MatchConfig,
    phase: RoomPhase,
    ball: BallState,
    paddles: PerSide<PaddleState>,
    score: ScoreState,
    players: PerSide<Option<RoomPlayer>>,
    spectators: Vec<Uuid>,
    inputs: PerSide<PaddleInput>,
    bots: PerSide<Option<ScriptedOpponent>>,
    /// Side that serves next (loser of the previous point)
    server: Side,
    serve_at: Option<Instant>,
    no_show_deadline: Option<Instant>,
    started: bool,
    outcome_sent: bool,
    rng: ChaCha8Rng,
    cadence: SnapshotCadence,
    cmd_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<RoomEvent>,
    outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
}

impl Room {
    pub fn new(
        id: Uuid,
        config: MatchConfig,
        seed: u64,
        outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    ) -> (Self, RoomHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(64);

        let handle = RoomHandle {
            id,
            cmd_tx,
            events_tx: events_tx.clone(),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let server = if rng.gen_bool(0.5) {
            Side::Left
        } else {
            Side::Right
        };

        let mut room = Self {
            id,
            phase: RoomPhase::Waiting,
            ball: BallState {
                x: FIELD_WIDTH / 2.0,
                y: FIELD_HEIGHT / 2.0,
                vx: 0.0,
                vy: 0.0,
            },
            paddles: PerSide {
                left: default_paddle(),
                right: default_paddle(),
            },
            score: ScoreState::default(),
            players: PerSide {
                left: None,
                right: None,
            },
            spectators: Vec::new(),
            inputs: PerSide::default(),
            bots: PerSide {
                left: None,
                right: None,
            },
            server,
            serve_at: None,
            no_show_deadline: None,
            started: false,
            outcome_sent: false,
            rng,
            cadence: SnapshotCadence::new(SIMULATION_TPS / SNAPSHOT_TPS),
            cmd_rx,
            events_tx,
            outcome_tx,
            config,
        };

        if let Some(difficulty) = room.config.ai {
            room.seat_ai(Side::Right, difficulty);
        }

        (room, handle)
    }

    fn seat_ai(&mut self, side: Side, difficulty: AiDifficulty) {
        let bot = ScriptedOpponent::new(side, difficulty);
        *self.players.get_mut(side) = Some(RoomPlayer {
            session_id: Uuid::new_v4(),
            user_id: None,
            display_name: bot.display_name(),
            avatar: None,
            side,
            is_ai: true,
            connected: true,
            grace_deadline: None,
        });
        *self.bots.get_mut(side) = Some(bot);
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn score(&self) -> ScoreState {
        self.score
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(room_id = %self.id, mode = ?self.config.mode(), "Room started");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain external mutations before simulating
            while let Ok(cmd) = self.cmd_rx.try_recv() {
                self.apply_command(cmd, Instant::now());
            }

            self.step(Instant::now());

            if self.cadence.should_send() {
                let _ = self.events_tx.send(RoomEvent::Snapshot(self.build_snapshot()));
            }

            if self.phase == RoomPhase::Finished {
                break;
            }
        }

        info!(room_id = %self.id, score = ?self.score, "Room stopped");
    }

    /// Apply one external mutation. Only ever called from the room's own
    /// execution context.
    pub fn apply_command(&mut self, cmd: RoomCommand, now: Instant) {
        match cmd {
            RoomCommand::Join {
                session_id,
                user_id,
                display_name,
                avatar,
                side,
                spectate,
                reply,
            } => {
                let result = self.handle_join(session_id, user_id, display_name, avatar, side, spectate, now);
                let _ = reply.send(result);
            }
            RoomCommand::Input { session_id, input } => {
                self.handle_input(session_id, input);
            }
            RoomCommand::Disconnect { session_id } => {
                self.handle_disconnect(session_id, now);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_join(
        &mut self,
        session_id: Uuid,
        user_id: Option<i64>,
        display_name: String,
        avatar: Option<String>,
        requested_side: Option<Side>,
        spectate: bool,
        now: Instant,
    ) -> Result<JoinAck, RoomError> {
        if self.phase == RoomPhase::Finished {
            return Err(RoomError::MatchFinished);
        }

        if spectate {
            if !self.config.allow_spectators {
                return Err(RoomError::SpectatorsDisabled);
            }
            if !self.spectators.contains(&session_id) {
                self.spectators.push(session_id);
            }
            return Ok(JoinAck {
                side: None,
                reconnected: false,
            });
        }

        // Reconnect is matched by user id, not socket id
        if let Some(uid) = user_id {
            for side in [Side::Left, Side::Right] {
                let slot = self.players.get_mut(side);
                if let Some(player) = slot {
                    if !player.is_ai && player.user_id == Some(uid) {
                        player.session_id = session_id;
                        player.connected = true;
                        player.grace_deadline = None;
                        info!(room_id = %self.id, user_id = uid, side = ?side, "Player reconnected");
                        self.maybe_resume(now);
                        return Ok(JoinAck {
                            side: Some(side),
                            reconnected: true,
                        });
                    }
                }
            }
        }

        let side = match requested_side {
            Some(side) => {
                if self.players.get(side).is_some() {
                    return Err(RoomError::SideTaken);
                }
                side
            }
            None => {
                if self.players.left.is_none() {
                    Side::Left
                } else if self.players.right.is_none() {
                    Side::Right
                } else {
                    return Err(RoomError::RoomFull);
                }
            }
        };

        *self.players.get_mut(side) = Some(RoomPlayer {
            session_id,
            user_id,
            display_name,
            avatar,
            side,
            is_ai: false,
            connected: true,
            grace_deadline: None,
        });

        info!(
            room_id = %self.id,
            user_id = ?user_id,
            side = ?side,
            "Player joined room"
        );

        if self.config.tournament.is_some() {
            let occupied =
                self.players.left.is_some() as u8 + self.players.right.is_some() as u8;
            if occupied == 2 {
                self.no_show_deadline = None;
            } else if self.no_show_deadline.is_none() && !self.started {
                self.no_show_deadline = Some(now + NO_SHOW_TIMEOUT);
            }
        }

        self.maybe_resume(now);

        Ok(JoinAck {
            side: Some(side),
            reconnected: false,
        })
    }

    fn handle_input(&mut self, session_id: Uuid, input: PaddleInput) {
        if self.phase == RoomPhase::Finished {
            return;
        }
        for side in [Side::Left, Side::Right] {
            if let Some(player) = self.players.get(side) {
                if !player.is_ai && player.session_id == session_id && player.connected {
                    *self.inputs.get_mut(side) = input;
                    return;
                }
            }
        }
    }

    fn handle_disconnect(&mut self, session_id: Uuid, now: Instant) {
        self.spectators.retain(|s| *s != session_id);

        for side in [Side::Left, Side::Right] {
            let Some(player) = self.players.get_mut(side) else {
                continue;
            };
            if player.is_ai || player.session_id != session_id || !player.connected {
                continue;
            }

            player.connected = false;
            player.grace_deadline = Some(now + DISCONNECT_GRACE);
            *self.inputs.get_mut(side) = PaddleInput::default();

            info!(room_id = %self.id, side = ?side, "Player disconnected, grace timer armed");

            // Freeze progression until both sides are ready again.
            // The point in flight is not rewound.
            if self.phase != RoomPhase::Finished {
                self.phase = RoomPhase::Waiting;
                self.serve_at = None;
                self.cadence.force_next();
            }
            return;
        }
    }

    /// Start (or resume) the serve sequence once both sides are present
    /// and connected
    fn maybe_resume(&mut self, now: Instant) {
        if self.phase != RoomPhase::Waiting {
            return;
        }
        if !self.both_sides_ready() {
            return;
        }

        self.phase = RoomPhase::Starting;
        self.serve_at = Some(now + SERVE_DELAY);

        let _ = self.events_tx.send(RoomEvent::Ready {
            start_at: unix_millis() + SERVE_DELAY.as_millis() as u64,
            players: self.players_brief(),
        });
    }

    fn both_sides_ready(&self) -> bool {
        [Side::Left, Side::Right].iter().all(|side| {
            self.players
                .get(*side)
                .as_ref()
                .map(|p| p.is_ai || p.connected)
                .unwrap_or(false)
        })
    }

    /// Advance the room one tick
    pub fn step(&mut self, now: Instant) {
        if self.phase == RoomPhase::Finished {
            return;
        }

        if self.check_timers(now) {
            return;
        }

        match self.phase {
            RoomPhase::Waiting => {}
            RoomPhase::Starting | RoomPhase::Paused => {
                if self.serve_at.map(|at| now >= at).unwrap_or(false) {
                    self.serve_now();
                }
            }
            RoomPhase::Playing => {
                self.advance_simulation(now);
            }
            RoomPhase::Finished => {}
        }
    }

    /// Timer-driven forced outcomes. Returns true when the match was
    /// finished by one of them.
    fn check_timers(&mut self, now: Instant) -> bool {
        // Disconnect grace expiry: opponent wins
        for side in [Side::Left, Side::Right] {
            let expired = self
                .players
                .get(side)
                .as_ref()
                .map(|p| {
                    !p.is_ai
                        && !p.connected
                        && p.grace_deadline.map(|d| now >= d).unwrap_or(false)
                })
                .unwrap_or(false);

            if expired {
                info!(room_id = %self.id, side = ?side, "Disconnect grace expired");
                self.finish(side.opponent(), EndReason::Disconnect);
                return true;
            }
        }

        // Tournament no-show forfeit: the present side wins
        if let Some(deadline) = self.no_show_deadline {
            if now >= deadline {
                let present = match (&self.players.left, &self.players.right) {
                    (Some(_), None) => Some(Side::Left),
                    (None, Some(_)) => Some(Side::Right),
                    _ => None,
                };
                match present {
                    Some(side) => {
                        info!(room_id = %self.id, side = ?side, "Opponent never joined, forfeiting");
                        self.finish(side, EndReason::Forfeit);
                        return true;
                    }
                    None => {
                        // Stale timer; both sides filled in the meantime
                        self.no_show_deadline = None;
                    }
                }
            }
        }

        false
    }

    fn serve_now(&mut self) {
        self.ball = PhysicsKernel::serve(&mut self.rng, self.server);
        self.serve_at = None;
        self.phase = RoomPhase::Playing;

        if !self.started {
            self.started = true;
            let _ = self.events_tx.send(RoomEvent::Start {
                players: self.players_brief(),
                mode: self.config.mode(),
            });
        }
    }

    fn advance_simulation(&mut self, now: Instant) {
        for side in [Side::Left, Side::Right] {
            if let Some(bot) = self.bots.get_mut(side).as_mut() {
                let decision = bot.decide(&self.ball, &self.paddles);
                *self.inputs.get_mut(side) = decision;
            }
        }

        PhysicsKernel::apply_input(&mut self.paddles.left, self.inputs.left);
        PhysicsKernel::apply_input(&mut self.paddles.right, self.inputs.right);

        let Some(scorer) = PhysicsKernel::step(&mut self.ball, &self.paddles.left, &self.paddles.right)
        else {
            return;
        };

        match scorer {
            Side::Left => self.score.left += 1,
            Side::Right => self.score.right += 1,
        }
        self.cadence.force_next();

        info!(room_id = %self.id, scorer = ?scorer, score = ?self.score, "Point scored");

        if self.score.for_side(scorer) >= self.config.score_limit {
            self.finish(scorer, EndReason::Score);
            return;
        }

        // Loser serves next
        self.server = scorer.opponent();
        self.phase = RoomPhase::Paused;
        self.serve_at = Some(now + SERVE_DELAY);
        self.ball = BallState {
            x: FIELD_WIDTH / 2.0,
            y: FIELD_HEIGHT / 2.0,
            vx: 0.0,
            vy: 0.0,
        };
    }

    /// Transition to the terminal state. Idempotent: repeated calls after the
    /// first are no-ops, and exactly one finished-match report is emitted.
    fn finish(&mut self, winner_side: Side, reason: EndReason) {
        if self.phase == RoomPhase::Finished {
            return;
        }

        // Asymmetric connectivity between two seated players resolves in
        // favor of the connected side, overriding any score-based decision.
        // An empty seat is a no-show, not a disconnect, and keeps the
        // caller's reason.
        let side_ready = |side: Side| {
            self.players
                .get(side)
                .as_ref()
                .map(|p| p.is_ai || p.connected)
        };
        let (winner_side, reason) = match (side_ready(Side::Left), side_ready(Side::Right)) {
            (Some(true), Some(false)) => (Side::Left, EndReason::Disconnect),
            (Some(false), Some(true)) => (Side::Right, EndReason::Disconnect),
            _ => (winner_side, reason),
        };

        self.phase = RoomPhase::Finished;
        self.serve_at = None;
        self.no_show_deadline = None;
        for side in [Side::Left, Side::Right] {
            if let Some(p) = self.players.get_mut(side) {
                p.grace_deadline = None;
            }
        }
        self.cadence.force_next();

        let players = self.players_brief();
        let tournament_id = self.config.tournament.map(|t| t.tournament_id);

        let _ = self.events_tx.send(RoomEvent::End(MatchEndInfo {
            winner_side,
            score: self.score,
            reason,
            players,
            tournament_id,
        }));

        if !self.outcome_sent {
            self.outcome_sent = true;

            let user_of = |side: Side| {
                self.players
                    .get(side)
                    .as_ref()
                    .and_then(|p| p.user_id)
            };

            let outcome = MatchOutcome {
                room_id: self.id,
                tournament: self.config.tournament,
                winner_side,
                winner_user_id: user_of(winner_side),
                loser_user_id: user_of(winner_side.opponent()),
                score: self.score,
                reason,
            };

            if self.outcome_tx.send(outcome).is_err() {
                warn!(room_id = %self.id, "No consumer for match outcome");
            }
        }

        info!(
            room_id = %self.id,
            winner = ?winner_side,
            reason = ?reason,
            score = ?self.score,
            "Match finished"
        );
    }

    fn players_brief(&self) -> SidePlayers {
        SidePlayers {
            left: self.players.left.as_ref().map(|p| p.brief()),
            right: self.players.right.as_ref().map(|p| p.brief()),
        }
    }

    /// Build a state snapshot for broadcast
    pub fn build_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.phase,
            ball: self.ball,
            paddles: PaddlePair {
                left: self.paddles.left,
                right: self.paddles.right,
            },
            score: self.score,
            players: self.players_brief(),
            meta: SnapshotMeta {
                room_id: self.id,
                timestamp: unix_millis(),
                tournament_id: self.config.tournament.map(|t| t.tournament_id),
            },
        }
    }
}
