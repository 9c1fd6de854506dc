// Leaderboard projection: point totals plus champion statistics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::ledger::{Ledger, LedgerError, Standing};

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub id: EntityId,
    pub name: String,
    pub image: String,
    pub total_points: i64,
    /// Submissions that crowned this entity.
    pub win_count: u32,
    /// `win_count` as a percentage of all submissions; 0 with no submissions.
    pub rank1_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rankings {
    pub rankings: Vec<RankingRow>,
    pub total_entities: usize,
    pub total_submissions: usize,
    /// Roster modification date, e.g. "October 16, 2026".
    pub last_updated: Option<String>,
}

/// Read the current totals and submissions and build the leaderboard.
///
/// Reads happen in one read transaction so the totals and champion counts
/// come from the same committed state, without waiting on submitters.
pub fn project<L: Ledger>(ledger: &L) -> Result<Rankings, LedgerError> {
    ledger.read_transaction(|tx| {
        let standings = tx.standings()?;
        let champion_counts = tx.champion_counts()?;
        let total_submissions = tx.submission_count()?;
        let updated_at = tx.roster_updated_at()?;
        Ok(project_from(
            standings,
            &champion_counts,
            total_submissions,
            updated_at,
        ))
    })
}

/// Pure aggregation behind [`project`].
///
/// Rows are ordered by total points, highest first. Ties keep the input
/// order, which for ledger standings is ascending entity id.
pub fn project_from(
    standings: Vec<Standing>,
    champion_counts: &HashMap<EntityId, u32>,
    total_submissions: usize,
    updated_at: Option<DateTime<Utc>>,
) -> Rankings {
    let mut rankings: Vec<RankingRow> = standings
        .into_iter()
        .map(|standing| {
            let win_count = champion_counts
                .get(&standing.entity.id)
                .copied()
                .unwrap_or(0);
            let rank1_ratio = if total_submissions > 0 {
                f64::from(win_count) / total_submissions as f64 * 100.0
            } else {
                0.0
            };
            RankingRow {
                id: standing.entity.id,
                name: standing.entity.name,
                image: standing.entity.image,
                total_points: standing.points,
                win_count,
                rank1_ratio,
            }
        })
        .collect();

    // sort_by is stable
    rankings.sort_by(|a, b| b.total_points.cmp(&a.total_points));

    Rankings {
        total_entities: rankings.len(),
        rankings,
        total_submissions,
        last_updated: updated_at.map(format_date),
    }
}

fn format_date(ts: DateTime<Utc>) -> String {
    ts.format("%B %-d, %Y").to_string()
}
