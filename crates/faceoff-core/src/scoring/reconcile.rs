// Idempotent per-voter score reconciliation.
//
// A voter holds at most one submission. Re-submitting reverses the points the
// previous submission awarded and applies the new ones, all inside a single
// ledger transaction, so concurrent submissions from different voters can
// never observe or leave a half-applied state.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::schedule::PointsSchedule;
use crate::bracket::placement::by_depth;
use crate::bracket::Placements;
use crate::entity::EntityId;
use crate::ledger::{Ledger, LedgerError, LedgerTx, PriorSubmission};

/// Longest voter id accepted.
pub const MAX_VOTER_ID_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The submission itself is malformed; retrying will not help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The ledger failed; no partial effects were kept.
    #[error("reconciliation failed after {attempts} attempt(s): {source}")]
    ReconciliationFailed {
        attempts: u32,
        #[source]
        source: LedgerError,
    },
}

/// How often to retry a transaction that hit a busy store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than 1.
    pub max_attempts: u32,
    /// Sleep before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileAck {
    pub voter_id: String,
    pub champion: EntityId,
    /// Whether an earlier submission by this voter was replaced.
    pub replaced_previous: bool,
    /// Points removed from the previous submission's entities.
    pub points_reversed: i64,
    /// Points added for the new submission.
    pub points_awarded: i64,
}

/// Outcome of a full rebuild of the point totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub submissions_applied: usize,
    pub submissions_skipped: usize,
}

/// Failure inside one transaction attempt.
enum TxError {
    Rejected(String),
    Ledger(LedgerError),
}

impl From<LedgerError> for TxError {
    fn from(err: LedgerError) -> Self {
        TxError::Ledger(err)
    }
}

/// Applies voter submissions to the shared point totals.
#[derive(Debug, Clone, Default)]
pub struct ScoreReconciler {
    schedule: PointsSchedule,
    retry: RetryPolicy,
}

impl ScoreReconciler {
    pub fn new(schedule: PointsSchedule, retry: RetryPolicy) -> Self {
        ScoreReconciler {
            schedule,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                ..retry
            },
        }
    }

    pub fn schedule(&self) -> &PointsSchedule {
        &self.schedule
    }

    /// Record `groups` as `voter_id`'s submission, replacing any earlier one.
    ///
    /// Validation of the voter id and the group structure happens before the
    /// ledger is touched; the roster-dependent checks (every id known, group
    /// sizes matching the roster's bracket shape) run inside the transaction.
    /// A stored prior submission that cannot be decoded is logged and its
    /// reversal skipped; the new submission still applies.
    pub fn reconcile<L: Ledger>(
        &self,
        ledger: &L,
        voter_id: &str,
        groups: Vec<Vec<EntityId>>,
    ) -> Result<ReconcileAck, ReconcileError> {
        if voter_id.trim().is_empty() {
            return Err(ReconcileError::InvalidRequest(
                "voterId is required".to_string(),
            ));
        }
        if voter_id.len() > MAX_VOTER_ID_LEN {
            return Err(ReconcileError::InvalidRequest(format!(
                "voterId is longer than {MAX_VOTER_ID_LEN} bytes"
            )));
        }
        let placements = Placements::from_groups(groups)
            .map_err(|e| ReconcileError::InvalidRequest(e.to_string()))?;

        let ack = self.with_retry(ledger, "reconcile", |tx| {
            self.apply_submission(tx, voter_id, &placements)
        })?;

        info!(
            voter = %ack.voter_id,
            champion = ack.champion,
            replaced = ack.replaced_previous,
            awarded = ack.points_awarded,
            reversed = ack.points_reversed,
            "submission reconciled"
        );
        Ok(ack)
    }

    /// Rebuild the totals if they are flagged stale or were computed with a
    /// different schedule than this reconciler's. Returns `None` when they
    /// are already current.
    pub fn refresh_totals<L: Ledger>(
        &self,
        ledger: &L,
    ) -> Result<Option<RebuildReport>, ReconcileError> {
        let (stale, stamp) = self.with_retry(ledger, "refresh", |tx| {
            Ok((tx.totals_stale()?, tx.schedule_stamp()?))
        })?;
        let schedule_changed = stamp.as_deref() != Some(self.schedule.values());

        if !stale && !schedule_changed {
            debug!("point totals are current");
            return Ok(None);
        }
        info!(stale, schedule_changed, "point totals need a rebuild");
        self.rebuild_totals(ledger).map(Some)
    }

    /// Recompute every total from the stored submissions in one transaction.
    /// Unreadable submissions are skipped with a warning. Clears the stale
    /// flag and records the schedule used.
    pub fn rebuild_totals<L: Ledger>(&self, ledger: &L) -> Result<RebuildReport, ReconcileError> {
        let report = self.with_retry(ledger, "rebuild", |tx| {
            tx.reset_points()?;
            let mut report = RebuildReport {
                submissions_applied: 0,
                submissions_skipped: 0,
            };
            for (voter_id, submission) in tx.all_submissions()? {
                match submission {
                    PriorSubmission::Groups(groups) => {
                        self.apply_groups(tx, &groups, 1)?;
                        report.submissions_applied += 1;
                    }
                    PriorSubmission::Unreadable { reason } => {
                        warn!(voter = %voter_id, "skipping unreadable submission: {reason}");
                        report.submissions_skipped += 1;
                    }
                }
            }
            tx.set_totals_stale(false)?;
            tx.set_schedule_stamp(self.schedule.values())?;
            Ok(report)
        })?;

        info!(
            applied = report.submissions_applied,
            skipped = report.submissions_skipped,
            "point totals rebuilt"
        );
        Ok(report)
    }

    fn apply_submission(
        &self,
        tx: &dyn LedgerTx,
        voter_id: &str,
        placements: &Placements,
    ) -> Result<ReconcileAck, TxError> {
        let roster_size = tx.entity_count()?;
        placements
            .check_shape(roster_size)
            .map_err(|e| TxError::Rejected(e.to_string()))?;

        let ids: Vec<EntityId> = placements.entity_ids().collect();
        let missing = tx.missing_entities(&ids)?;
        if !missing.is_empty() {
            return Err(TxError::Rejected(format!("unknown entity ids: {missing:?}")));
        }

        let prior = tx.load_submission(voter_id)?;
        let replaced_previous = prior.is_some();
        let points_reversed = match prior {
            Some(PriorSubmission::Groups(groups)) => self.apply_groups(tx, &groups, -1)?,
            Some(PriorSubmission::Unreadable { reason }) => {
                warn!(voter = %voter_id, "previous submission unreadable, not reversing it: {reason}");
                0
            }
            None => 0,
        };

        let points_awarded = self.apply_groups(tx, placements.groups(), 1)?;
        tx.upsert_submission(voter_id, placements)?;

        Ok(ReconcileAck {
            voter_id: voter_id.to_string(),
            champion: placements.champion(),
            replaced_previous,
            points_reversed,
            points_awarded,
        })
    }

    /// Add (`sign = 1`) or remove (`sign = -1`) the points a set of groups is
    /// worth. Returns the absolute number of points moved.
    fn apply_groups(
        &self,
        tx: &dyn LedgerTx,
        groups: &[Vec<EntityId>],
        sign: i64,
    ) -> Result<i64, LedgerError> {
        let mut moved = 0;
        for (depth, group) in by_depth(groups) {
            let points = self.schedule.points_for_depth(depth);
            if points == 0 || group.is_empty() {
                continue;
            }
            tx.adjust_points(group, sign * points)?;
            moved += points * group.len() as i64;
        }
        Ok(moved)
    }

    fn with_retry<L, T, F>(&self, ledger: &L, op: &str, mut attempt_fn: F) -> Result<T, ReconcileError>
    where
        L: Ledger,
        F: FnMut(&dyn LedgerTx) -> Result<T, TxError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match ledger.in_transaction(&mut attempt_fn) {
                Ok(value) => return Ok(value),
                Err(TxError::Rejected(message)) => {
                    debug!(op, "rejected: {message}");
                    return Err(ReconcileError::InvalidRequest(message));
                }
                Err(TxError::Ledger(err)) if err.is_busy() && attempt < self.retry.max_attempts => {
                    warn!(op, attempt, "ledger busy, retrying: {err}");
                    thread::sleep(self.retry.backoff * attempt);
                }
                Err(TxError::Ledger(source)) => {
                    error!(op, attempt, "ledger transaction failed: {source}");
                    return Err(ReconcileError::ReconciliationFailed {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}
