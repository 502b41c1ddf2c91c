//! Single-elimination tournaments

pub mod bracket;
pub mod service;
pub mod store;

pub use service::TournamentService;

#[derive(Debug, thiserror::Error)]
pub enum TournamentError {
    #[error("Tournament not found")]
    NotFound,

    #[error("Tournament is full")]
    Full,

    #[error("Already joined this tournament")]
    AlreadyJoined,

    #[error("Only the creator can start the tournament")]
    NotCreator,

    #[error("Tournament is not in the right state for this operation")]
    WrongStatus,

    #[error("At least two players are required to start")]
    NotEnoughPlayers,

    #[error("No pending match for this player")]
    NoPendingMatch,

    #[error("Match is not ready to be played")]
    MatchNotReady,

    #[error("Unknown match")]
    UnknownMatch,

    #[error("Reported winner is not a participant of this match")]
    InvalidWinner,

    #[error("Match result was already recorded")]
    AlreadyFinished,
}
