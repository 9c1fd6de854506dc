// JSON messages exchanged with voter clients over the WebSocket.
//
// Every message is an object tagged by `type` (SCREAMING_SNAKE_CASE) with
// camelCase fields.

use serde::{Deserialize, Serialize};

use crate::bracket::{BracketError, MatchView, PlacementSummary};
use crate::entity::{Entity, EntityId};
use crate::ranking::Rankings;
use crate::scoring::ReconcileError;

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    GetRoster,
    GetRankings,
    /// Shuffle the roster into a fresh bracket, discarding any run in
    /// progress on this connection.
    StartTournament,
    #[serde(rename_all = "camelCase")]
    SelectWinner { entity_id: EntityId },
    #[serde(rename_all = "camelCase")]
    SubmitResult {
        voter_id: String,
        placement_groups: Vec<Vec<EntityId>>,
    },
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Roster {
        entities: Vec<Entity>,
    },
    Rankings(Rankings),
    Match(MatchView),
    #[serde(rename_all = "camelCase")]
    TournamentComplete {
        champion: Entity,
        /// Loser groups in elimination order, champion last. Submit these
        /// unchanged with `SUBMIT_RESULT`.
        placement_groups: Vec<Vec<EntityId>>,
        summary: PlacementSummary,
    },
    #[serde(rename_all = "camelCase")]
    Submitted {
        ok: bool,
        replaced_previous: bool,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Stable error categories reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRequest,
    InvalidSelection,
    TournamentAlreadyComplete,
    ReconciliationFailed,
    NoActiveMatch,
    InsufficientContestants,
    Internal,
}

impl From<&BracketError> for ErrorKind {
    fn from(err: &BracketError) -> Self {
        match err {
            BracketError::InsufficientContestants { .. } => ErrorKind::InsufficientContestants,
            BracketError::DuplicateEntity(_) => ErrorKind::InvalidRequest,
            BracketError::NoActiveMatch => ErrorKind::NoActiveMatch,
            BracketError::InvalidSelection { .. } => ErrorKind::InvalidSelection,
            BracketError::TournamentAlreadyComplete => ErrorKind::TournamentAlreadyComplete,
        }
    }
}

impl From<&ReconcileError> for ErrorKind {
    fn from(err: &ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ReconcileError::ReconciliationFailed { .. } => ErrorKind::ReconciliationFailed,
        }
    }
}

impl From<BracketError> for ServerMessage {
    fn from(err: BracketError) -> Self {
        ServerMessage::error(ErrorKind::from(&err), err.to_string())
    }
}

impl From<ReconcileError> for ServerMessage {
    fn from(err: ReconcileError) -> Self {
        ServerMessage::error(ErrorKind::from(&err), err.to_string())
    }
}
