//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::game::room::MatchOutcome;
use crate::game::RoomRegistry;
use crate::matchmaking::Matchmaker;
use crate::notify::Notifier;
use crate::tournament::TournamentService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub matchmaker: Arc<Matchmaker>,
    pub tournaments: Arc<TournamentService>,
}

impl AppState {
    /// Build the state graph plus the outcome router that must be spawned
    /// alongside the server.
    pub fn new(config: Config) -> (Self, OutcomeRouter) {
        let config = Arc::new(config);

        let registry = Arc::new(RoomRegistry::new());

        // Single funnel for finished-match reports from every room
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let matchmaker = Arc::new(Matchmaker::new(
            registry.clone(),
            outcome_tx.clone(),
            config.score_limit,
        ));

        let tournaments = Arc::new(TournamentService::new(
            registry.clone(),
            outcome_tx,
            config.score_limit,
        ));

        let notifier = Notifier::spawn(config.result_webhook_url.clone());

        let router = OutcomeRouter {
            rx: outcome_rx,
            notifier,
            tournaments: tournaments.clone(),
        };

        (
            Self {
                config,
                registry,
                matchmaker,
                tournaments,
            },
            router,
        )
    }
}

/// Consumes finished-match reports in arrival order. Processing is
/// strictly sequential, which keeps bracket updates for any one
/// tournament serialized.
pub struct OutcomeRouter {
    rx: mpsc::UnboundedReceiver<MatchOutcome>,
    notifier: Notifier,
    tournaments: Arc<TournamentService>,
}

impl OutcomeRouter {
    pub async fn run(mut self) {
        while let Some(outcome) = self.rx.recv().await {
            self.notifier.publish(&outcome);
            self.tournaments.handle_report(&outcome);
        }
    }
}
