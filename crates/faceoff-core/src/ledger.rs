// Storage seam for the shared leaderboard: per-entity point totals and the
// one-per-voter submission records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::bracket::Placements;
use crate::entity::{Entity, EntityId};

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Another writer holds the store; the operation may be retried.
    #[error("storage is busy: {0}")]
    Busy(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn is_busy(&self) -> bool {
        matches!(self, LedgerError::Busy(_))
    }
}

/// A voter's previously stored placements, as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorSubmission {
    /// Chronological groups, champion last. Legacy rows may contain empty
    /// groups so that depths still line up.
    Groups(Vec<Vec<EntityId>>),
    /// The stored value could not be decoded.
    Unreadable { reason: String },
}

/// An entity together with its current point total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub entity: Entity,
    pub points: i64,
}

/// Operations available inside one ledger transaction.
pub trait LedgerTx {
    fn entity_count(&self) -> Result<usize, LedgerError>;

    /// The subset of `ids` with no matching entity.
    fn missing_entities(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, LedgerError>;

    fn load_submission(&self, voter_id: &str) -> Result<Option<PriorSubmission>, LedgerError>;

    /// Add `delta` (possibly negative) to the total of every entity in `ids`.
    /// Applied as a store-side increment, not a read-modify-write.
    fn adjust_points(&self, ids: &[EntityId], delta: i64) -> Result<(), LedgerError>;

    /// Insert or replace the voter's submission.
    fn upsert_submission(&self, voter_id: &str, placements: &Placements)
        -> Result<(), LedgerError>;

    /// Every entity with its total, ordered by id.
    fn standings(&self) -> Result<Vec<Standing>, LedgerError>;

    /// Number of stored submissions per champion.
    fn champion_counts(&self) -> Result<HashMap<EntityId, u32>, LedgerError>;

    fn submission_count(&self) -> Result<usize, LedgerError>;

    fn all_submissions(&self) -> Result<Vec<(String, PriorSubmission)>, LedgerError>;

    /// Set every entity's total back to zero.
    fn reset_points(&self) -> Result<(), LedgerError>;

    fn roster_updated_at(&self) -> Result<Option<DateTime<Utc>>, LedgerError>;

    /// Whether totals must be rebuilt before they can be trusted.
    fn totals_stale(&self) -> Result<bool, LedgerError>;

    fn set_totals_stale(&self, stale: bool) -> Result<(), LedgerError>;

    /// Schedule values the current totals were computed with, if recorded.
    fn schedule_stamp(&self) -> Result<Option<Vec<i64>>, LedgerError>;

    fn set_schedule_stamp(&self, values: &[i64]) -> Result<(), LedgerError>;
}

/// A store that can run a closure as one serialized, all-or-nothing unit.
pub trait Ledger {
    /// Run `f` inside a write transaction. `Ok` commits; `Err` rolls back
    /// every change `f` made.
    fn in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerTx) -> Result<T, E>,
        E: From<LedgerError>;

    /// Run `f` inside a transaction that only reads. Stores that can give
    /// readers a snapshot without taking the write lock override this.
    fn read_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerTx) -> Result<T, E>,
        E: From<LedgerError>,
    {
        self.in_transaction(f)
    }
}
