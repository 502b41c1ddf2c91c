//! WebSocket session handling
//!
//! One task per socket. Outbound traffic funnels through a single unbounded
//! channel: direct replies, matchmaking notifications, and room events all
//! land there, so the session loop only ever selects over two sources. Room
//! events are re-mapped onto wire messages by a per-room forwarder task that
//! knows which side this session plays.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::room::{JoinAck, RoomCommand, RoomHandle};
use crate::game::{PaddleInput, RoomEvent};
use crate::matchmaking::{JoinOptions, MatchmakingReply, Participant};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, MatchMode, ServerMsg, Side};

/// Query parameters for WebSocket connection. All optional: a bare
/// connection is a guest session.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<i64>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

/// The session's current room membership
struct CurrentRoom {
    handle: RoomHandle,
    side: Option<Side>,
    forwarder: JoinHandle<()>,
}

impl Drop for CurrentRoom {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

struct Session {
    session_id: Uuid,
    user_id: Option<i64>,
    display_name: String,
    avatar: Option<String>,
    room: Option<CurrentRoom>,
    /// Every outbound message funnels through here
    events_tx: mpsc::UnboundedSender<ServerMsg>,
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, query: WsQuery, state: AppState) {
    let session_id = Uuid::new_v4();
    let display_name = query.display_name.unwrap_or_else(|| match query.user_id {
        Some(id) => format!("Player {}", id),
        None => format!("Guest_{}", &session_id.to_string()[..8]),
    });

    info!(
        session_id = %session_id,
        user_id = ?query.user_id,
        "New WebSocket connection"
    );

    let (mut ws_sink, mut ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        session_id,
        server_time: unix_millis(),
    };
    if send_msg(&mut ws_sink, &welcome).await.is_err() {
        return;
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut session = Session {
        session_id,
        user_id: query.user_id,
        display_name,
        avatar: query.avatar,
        room: None,
        events_tx,
    };
    let rate_limiter = SessionRateLimiter::new();

    loop {
        tokio::select! {
            incoming = ws_stream.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(client_msg) => {
                                handle_client_msg(
                                    &state,
                                    &mut session,
                                    &rate_limiter,
                                    &mut ws_sink,
                                    client_msg,
                                )
                                .await;
                            }
                            Err(e) => {
                                warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                                let _ = send_msg(
                                    &mut ws_sink,
                                    &ServerMsg::Error {
                                        code: "bad_message".into(),
                                        message: "Could not parse message".into(),
                                    },
                                )
                                .await;
                            }
                        }
                    }
                    Message::Close(_) => {
                        info!(session_id = %session_id, "Client initiated close");
                        break;
                    }
                    Message::Binary(_) => {
                        warn!(session_id = %session_id, "Received binary message, ignoring");
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }

            outbound = events_rx.recv() => {
                // Sender half lives in `session`, so this never yields None
                // while the loop runs
                let Some(msg) = outbound else { break };

                // A matchmaking notification means a room is waiting for us
                if let ServerMsg::MatchFound { room_id, side, .. } = &msg {
                    if let Some(handle) = state.registry.get(room_id) {
                        let _ = enter_room(&mut session, handle, Some(*side), false).await;
                    }
                }

                if send_msg(&mut ws_sink, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    // Cleanup on disconnect
    state.matchmaker.leave(session_id);
    if let Some(room) = session.room.take() {
        let _ = room
            .handle
            .cmd_tx
            .send(RoomCommand::Disconnect { session_id })
            .await;
    }

    info!(session_id = %session_id, "WebSocket connection closed");
}

async fn handle_client_msg(
    state: &AppState,
    session: &mut Session,
    rate_limiter: &SessionRateLimiter,
    ws_sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: ClientMsg,
) {
    match msg {
        ClientMsg::FindMatch { vs_ai, difficulty } => {
            let participant = Participant {
                session_id: session.session_id,
                user_id: session.user_id,
                display_name: session.display_name.clone(),
            };
            let options = JoinOptions {
                vs_ai,
                difficulty: difficulty.unwrap_or_default(),
            };

            let reply = state
                .matchmaker
                .join(participant, options, session.events_tx.clone());

            match reply {
                MatchmakingReply::Queued => {
                    let _ = send_msg(ws_sink, &ServerMsg::Queued).await;
                }
                MatchmakingReply::Matched {
                    room_id,
                    side,
                    opponent_label,
                } => {
                    let Some(handle) = state.registry.get(&room_id) else {
                        return;
                    };
                    let _ = enter_room(session, handle, Some(side), false).await;

                    let mode = if vs_ai {
                        MatchMode::VsAi
                    } else {
                        MatchMode::Casual
                    };
                    let _ = send_msg(
                        ws_sink,
                        &ServerMsg::MatchFound {
                            room_id,
                            side,
                            mode,
                            opponent_label,
                        },
                    )
                    .await;
                }
            }
        }

        ClientMsg::JoinTournamentMatch { tournament_id } => {
            let Some(user_id) = session.user_id else {
                let _ = send_msg(
                    ws_sink,
                    &ServerMsg::Error {
                        code: "auth_required".into(),
                        message: "Tournament play requires a signed-in user".into(),
                    },
                )
                .await;
                return;
            };

            let ticket = match state.tournaments.join_match(tournament_id, user_id) {
                Ok(ticket) => ticket,
                Err(e) => {
                    let _ = send_error(ws_sink, "tournament", &e.to_string()).await;
                    return;
                }
            };

            let Some(handle) = state.registry.get(&ticket.room_id) else {
                let _ = send_error(ws_sink, "room_unavailable", "Match room is gone").await;
                return;
            };

            match enter_room(session, handle, Some(ticket.side), false).await {
                Ok(ack) => {
                    let _ = send_msg(
                        ws_sink,
                        &ServerMsg::RoomJoined {
                            room_id: ticket.room_id,
                            side: ack.side,
                        },
                    )
                    .await;
                }
                Err(message) => {
                    let _ = send_error(ws_sink, "join_failed", &message).await;
                }
            }
        }

        ClientMsg::JoinRoom { room_id, spectate } => {
            let Some(handle) = state.registry.get(&room_id) else {
                let _ = send_error(ws_sink, "room_not_found", "No such room").await;
                return;
            };

            match enter_room(session, handle, None, spectate).await {
                Ok(ack) => {
                    let _ = send_msg(
                        ws_sink,
                        &ServerMsg::RoomJoined {
                            room_id,
                            side: ack.side,
                        },
                    )
                    .await;
                }
                Err(message) => {
                    let _ = send_error(ws_sink, "join_failed", &message).await;
                }
            }
        }

        ClientMsg::Input { up, down } => {
            if !rate_limiter.check_input() {
                return;
            }
            let Some(room) = &session.room else { return };
            if room.side.is_none() {
                // Spectators have no paddle
                return;
            }
            let _ = room.handle.cmd_tx.try_send(RoomCommand::Input {
                session_id: session.session_id,
                input: PaddleInput { up, down },
            });
        }

        ClientMsg::Leave => {
            state.matchmaker.leave(session.session_id);
            if let Some(room) = session.room.take() {
                let _ = room
                    .handle
                    .cmd_tx
                    .send(RoomCommand::Disconnect {
                        session_id: session.session_id,
                    })
                    .await;
            }
        }

        ClientMsg::Ping { t } => {
            let _ = send_msg(ws_sink, &ServerMsg::Pong { t }).await;
        }
    }
}

/// Join a room and start forwarding its events into the session funnel.
/// Replaces any previous room membership.
async fn enter_room(
    session: &mut Session,
    handle: RoomHandle,
    requested_side: Option<Side>,
    spectate: bool,
) -> Result<JoinAck, String> {
    // Already there; the room handles rejoin idempotently, so just
    // keep the existing forwarder
    if let Some(current) = &session.room {
        if current.handle.id == handle.id {
            return Ok(JoinAck {
                side: current.side,
                reconnected: true,
            });
        }
    }

    if let Some(previous) = session.room.take() {
        let _ = previous
            .handle
            .cmd_tx
            .send(RoomCommand::Disconnect {
                session_id: session.session_id,
            })
            .await;
    }

    let (reply, reply_rx) = oneshot::channel();
    handle
        .cmd_tx
        .send(RoomCommand::Join {
            session_id: session.session_id,
            user_id: session.user_id,
            display_name: session.display_name.clone(),
            avatar: session.avatar.clone(),
            side: requested_side,
            spectate,
            reply,
        })
        .await
        .map_err(|_| "Room is shutting down".to_string())?;

    let ack = reply_rx
        .await
        .map_err(|_| "Room dropped the join request".to_string())?
        .map_err(|e| e.to_string())?;

    debug!(
        session_id = %session.session_id,
        room_id = %handle.id,
        side = ?ack.side,
        reconnected = ack.reconnected,
        "Entered room"
    );

    let forwarder = spawn_event_forwarder(
        handle.subscribe(),
        session.events_tx.clone(),
        ack.side,
        session.session_id,
    );

    session.room = Some(CurrentRoom {
        handle,
        side: ack.side,
        forwarder,
    });

    Ok(ack)
}

/// Forward room events into the session funnel, personalized to this
/// session's side. Ends with the room's event stream.
fn spawn_event_forwarder(
    mut rx: broadcast::Receiver<RoomEvent>,
    tx: mpsc::UnboundedSender<ServerMsg>,
    my_side: Option<Side>,
    session_id: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let ended = matches!(event, RoomEvent::End(_));
                    if let Some(msg) = map_event(event, my_side) {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    if ended {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(session_id = %session_id, lagged_count = n, "Client lagged, skipping {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Map a room event onto the wire. Spectators see the match from the
/// left player's perspective.
fn map_event(event: RoomEvent, my_side: Option<Side>) -> Option<ServerMsg> {
    match event {
        RoomEvent::Ready { start_at, players } => {
            Some(ServerMsg::MatchReady { start_at, players })
        }
        RoomEvent::Start { players, mode } => {
            let side = my_side.unwrap_or(Side::Left);
            let you = players.for_side(side)?.clone();
            let opponent = players.for_side(side.opponent())?.clone();
            Some(ServerMsg::MatchStart {
                you,
                opponent,
                mode,
            })
        }
        RoomEvent::Snapshot(snapshot) => Some(ServerMsg::Snapshot(snapshot)),
        RoomEvent::End(info) => Some(ServerMsg::MatchEnd(info)),
    }
}

async fn send_error(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    code: &str,
    message: &str,
) -> Result<(), String> {
    send_msg(
        sink,
        &ServerMsg::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    )
    .await
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
