//! HTTP route definitions

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::tournament::service::{BracketRound, LeaderboardEntry, TournamentOverview};
use crate::tournament::store::{AdvanceSummary, Tournament, TournamentMatch};
use crate::tournament::TournamentError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/tournaments", post(create_tournament_handler))
        .route("/tournaments", get(list_tournaments_handler))
        .route("/tournaments/:id", get(tournament_overview_handler))
        .route("/tournaments/:id/join", post(join_tournament_handler))
        .route("/tournaments/:id/start", post(start_tournament_handler))
        .route("/tournaments/:id/advance", post(advance_tournament_handler))
        .route("/tournaments/:id/bracket", get(bracket_handler))
        .route("/tournaments/:id/leaderboard", get(leaderboard_handler))
        .route("/tournaments/:id/next-match", get(next_match_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Identity
// ============================================================================

/// Caller identity taken from trusted gateway headers. Tournament writes
/// require a real user id; guests stay on the WebSocket side.
pub struct UserIdentity {
    pub user_id: i64,
    pub display_name: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or(AppError::Unauthorized)?;

        let display_name = parts
            .headers
            .get("x-display-name")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("Player {}", user_id));

        Ok(Self {
            user_id,
            display_name,
        })
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    tournaments: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.registry.active_rooms(),
        tournaments: state.tournaments.count(),
    })
}

// ============================================================================
// Tournament endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateTournamentRequest {
    name: String,
    max_players: u32,
}

async fn create_tournament_handler(
    State(state): State<AppState>,
    identity: UserIdentity,
    Json(req): Json<CreateTournamentRequest>,
) -> Result<Json<Tournament>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Tournament name is required".into()));
    }

    let tournament =
        state
            .tournaments
            .create(req.name.trim().to_string(), identity.user_id, req.max_players);
    Ok(Json(tournament))
}

async fn list_tournaments_handler(State(state): State<AppState>) -> Json<Vec<Tournament>> {
    Json(state.tournaments.list())
}

async fn tournament_overview_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TournamentOverview>, AppError> {
    Ok(Json(state.tournaments.overview(id)?))
}

#[derive(Serialize)]
struct JoinTournamentResponse {
    status: &'static str,
}

async fn join_tournament_handler(
    State(state): State<AppState>,
    identity: UserIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<JoinTournamentResponse>, AppError> {
    state
        .tournaments
        .join(id, identity.user_id, identity.display_name)?;
    Ok(Json(JoinTournamentResponse { status: "joined" }))
}

#[derive(Serialize)]
struct StartTournamentResponse {
    status: &'static str,
}

async fn start_tournament_handler(
    State(state): State<AppState>,
    identity: UserIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<StartTournamentResponse>, AppError> {
    state.tournaments.start(id, identity.user_id)?;
    Ok(Json(StartTournamentResponse { status: "started" }))
}

async fn advance_tournament_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AdvanceSummary>, AppError> {
    Ok(Json(state.tournaments.advance(id)?))
}

async fn bracket_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BracketRound>>, AppError> {
    Ok(Json(state.tournaments.bracket_view(id)?))
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    Ok(Json(state.tournaments.leaderboard(id)?))
}

async fn next_match_handler(
    State(state): State<AppState>,
    identity: UserIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TournamentMatch>, AppError> {
    Ok(Json(state.tournaments.next_match(id, identity.user_id)?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl From<TournamentError> for AppError {
    fn from(err: TournamentError) -> Self {
        match err {
            TournamentError::NotFound | TournamentError::UnknownMatch => {
                AppError::NotFound(err.to_string())
            }
            TournamentError::NotCreator => AppError::Unauthorized,
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
