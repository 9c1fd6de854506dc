// Request dispatch for voter connections.
//
// Bracket play touches only the connection's own session. Roster reads,
// ranking projection and submissions go to the shared database on the
// blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use faceoff_core::bracket::{match_view, BracketError, BracketState};
use faceoff_core::db::Database;
use faceoff_core::entity::{Entity, EntityId};
use faceoff_core::ledger::LedgerError;
use faceoff_core::protocol::{ClientMessage, ErrorKind, ServerMessage};
use faceoff_core::ranking::{self, Rankings};
use faceoff_core::scoring::ScoreReconciler;
use faceoff_core::ws_server::ConnectionHandler;

use crate::session::Session;

/// Failures that are the server's fault, reported as `INTERNAL`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Shared application state behind every connection.
pub struct App {
    db: Arc<Database>,
    reconciler: Arc<ScoreReconciler>,
}

impl App {
    pub fn new(db: Arc<Database>, reconciler: ScoreReconciler) -> Self {
        App {
            db,
            reconciler: Arc::new(reconciler),
        }
    }

    /// Parse one request and produce its reply.
    pub async fn respond(&self, session: &mut Session, text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.dispatch(session, msg).await,
            Err(e) => {
                debug!("unparseable request from {}: {e}", session.addr());
                ServerMessage::error(ErrorKind::InvalidRequest, format!("unrecognized message: {e}"))
            }
        }
    }

    pub async fn dispatch(&self, session: &mut Session, msg: ClientMessage) -> ServerMessage {
        let result = match msg {
            ClientMessage::GetRoster => self
                .roster()
                .await
                .map(|entities| ServerMessage::Roster { entities }),
            ClientMessage::GetRankings => self.rankings().await.map(ServerMessage::Rankings),
            ClientMessage::StartTournament => self.start_tournament(session).await,
            ClientMessage::SelectWinner { entity_id } => Ok(select_winner(session, entity_id)),
            ClientMessage::SubmitResult {
                voter_id,
                placement_groups,
            } => self.submit(voter_id, placement_groups).await,
        };

        result.unwrap_or_else(|e| {
            error!("request from {} failed: {e}", session.addr());
            ServerMessage::error(ErrorKind::Internal, e.to_string())
        })
    }

    async fn roster(&self) -> Result<Vec<Entity>, AppError> {
        Ok(self.blocking(|db| db.load_roster()).await??)
    }

    async fn rankings(&self) -> Result<Rankings, AppError> {
        Ok(self.blocking(|db| ranking::project(db)).await??)
    }

    async fn start_tournament(&self, session: &mut Session) -> Result<ServerMessage, AppError> {
        let roster = self.roster().await?;
        let started = session.start(roster).map(|_| ());
        if let Err(e) = started {
            warn!("cannot start bracket for {}: {e}", session.addr());
            return Ok(e.into());
        }
        if let Some(state) = session.bracket() {
            info!(
                "{} started a bracket of {} entities",
                session.addr(),
                state.roster_size
            );
        }
        Ok(progress_message(session.bracket()))
    }

    async fn submit(
        &self,
        voter_id: String,
        placement_groups: Vec<Vec<EntityId>>,
    ) -> Result<ServerMessage, AppError> {
        let reconciler = Arc::clone(&self.reconciler);
        let outcome = self
            .blocking(move |db| reconciler.reconcile(db, &voter_id, placement_groups))
            .await?;

        Ok(match outcome {
            Ok(ack) => ServerMessage::Submitted {
                ok: true,
                replaced_previous: ack.replaced_previous,
            },
            Err(e) => {
                warn!("submission rejected: {e}");
                e.into()
            }
        })
    }

    /// Run `f` against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Database) -> T + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        Ok(tokio::task::spawn_blocking(move || f(&db)).await?)
    }
}

fn select_winner(session: &mut Session, entity_id: EntityId) -> ServerMessage {
    let selected = session.select(entity_id).map(|_| ());
    if let Err(e) = selected {
        debug!("selection rejected for {}: {e}", session.addr());
        return e.into();
    }

    let message = progress_message(session.bracket());
    if let ServerMessage::TournamentComplete { champion, .. } = &message {
        info!("{} crowned {} ({})", session.addr(), champion.name, champion.id);
    }
    message
}

/// Next `MATCH` for a run in progress, or the result of a finished one.
fn progress_message(state: Option<&BracketState>) -> ServerMessage {
    let Some(state) = state else {
        return BracketError::NoActiveMatch.into();
    };

    if let (Some(champion), Some(placements)) = (&state.champion, state.placements()) {
        return ServerMessage::TournamentComplete {
            champion: champion.clone(),
            placement_groups: placements.groups().to_vec(),
            summary: placements.summary(),
        };
    }

    match match_view(state) {
        Some(view) => ServerMessage::Match(view),
        None => BracketError::NoActiveMatch.into(),
    }
}

#[async_trait]
impl ConnectionHandler for App {
    type Session = Session;

    fn open_session(&self, addr: &str) -> Session {
        Session::new(addr)
    }

    async fn handle_text(&self, session: &mut Session, text: &str) -> String {
        let reply = self.respond(session, text).await;
        serde_json::to_string(&reply).unwrap_or_else(|e| {
            error!("failed to serialize reply: {e}");
            r#"{"type":"ERROR","kind":"INTERNAL","message":"failed to serialize reply"}"#.to_string()
        })
    }

    fn close_session(&self, session: Session) {
        if session.bracket().is_some_and(|b| !b.is_complete()) {
            debug!("{} left with a bracket in progress", session.addr());
        }
    }
}
