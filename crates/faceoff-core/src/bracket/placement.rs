// Placement groups: who was eliminated in which round.
//
// Groups are stored chronologically (earliest eliminated first). Scoring keys
// on depth from the end instead: the champion is depth 0, the runner-up depth
// 1, semifinal losers depth 2, and so on.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::builder::elimination_shape;
use crate::entity::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("placements need at least one eliminated group and a champion, got {count} group(s)")]
    MissingGroups { count: usize },

    #[error("placement group {index} is empty")]
    EmptyGroup { index: usize },

    #[error("the final placement group must hold exactly one champion, got {len} ids")]
    ChampionGroup { len: usize },

    #[error("entity {0} is placed more than once")]
    DuplicateEntity(EntityId),

    #[error("a roster of {roster_size} cannot produce a completed bracket")]
    RosterTooSmall { roster_size: usize },

    #[error("placement group sizes {actual:?} do not match a {roster_size}-entity bracket {expected:?}")]
    ShapeMismatch {
        roster_size: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Pair each group with its depth from the end of the list.
pub fn by_depth(groups: &[Vec<EntityId>]) -> impl Iterator<Item = (usize, &[EntityId])> {
    let last = groups.len().saturating_sub(1);
    groups
        .iter()
        .enumerate()
        .map(move |(index, group)| (last - index, group.as_slice()))
}

// ---------------------------------------------------------------------------
// In-progress record
// ---------------------------------------------------------------------------

/// Loser groups of the rounds played so far, earliest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacementGroups(Vec<Vec<EntityId>>);

impl PlacementGroups {
    /// Append the losers of a just-finished round. Order within the group is
    /// not significant.
    pub fn record_round_losers(&self, losers: Vec<EntityId>) -> PlacementGroups {
        let mut groups = self.0.clone();
        groups.push(losers);
        PlacementGroups(groups)
    }

    pub fn groups(&self) -> &[Vec<EntityId>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of entities eliminated so far.
    pub fn eliminated_count(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// Close the record with the champion as the final singleton group.
    pub fn finish(self, champion: EntityId) -> Placements {
        let mut groups = self.0;
        groups.push(vec![champion]);
        Placements { groups }
    }
}

// ---------------------------------------------------------------------------
// Completed placements
// ---------------------------------------------------------------------------

/// The placement groups of a completed run, champion last. This is the form
/// voters submit and the form stored per voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<EntityId>>", into = "Vec<Vec<EntityId>>")]
pub struct Placements {
    groups: Vec<Vec<EntityId>>,
}

/// Fixed-depth view of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSummary {
    pub winner: EntityId,
    pub runner_up: Option<EntityId>,
    pub semifinalists: Vec<EntityId>,
    pub quarterfinalists: Vec<EntityId>,
}

impl Placements {
    /// Validate the structure of submitted groups: at least one loser group
    /// plus a champion, no empty groups, a singleton final group, and no
    /// entity placed twice.
    pub fn from_groups(groups: Vec<Vec<EntityId>>) -> Result<Self, PlacementError> {
        if groups.len() < 2 {
            return Err(PlacementError::MissingGroups {
                count: groups.len(),
            });
        }

        if let Some(index) = groups.iter().position(Vec::is_empty) {
            return Err(PlacementError::EmptyGroup { index });
        }

        let champion_len = groups.last().map(Vec::len).unwrap_or(0);
        if champion_len != 1 {
            return Err(PlacementError::ChampionGroup { len: champion_len });
        }

        let mut seen = HashSet::new();
        for &id in groups.iter().flatten() {
            if !seen.insert(id) {
                return Err(PlacementError::DuplicateEntity(id));
            }
        }

        Ok(Placements { groups })
    }

    /// Check that the loser-group sizes are exactly those a bracket over
    /// `roster_size` entities produces.
    pub fn check_shape(&self, roster_size: usize) -> Result<(), PlacementError> {
        let expected = elimination_shape(roster_size)
            .map_err(|_| PlacementError::RosterTooSmall { roster_size })?;
        let actual: Vec<usize> = self.groups[..self.groups.len() - 1]
            .iter()
            .map(Vec::len)
            .collect();

        if actual != expected {
            return Err(PlacementError::ShapeMismatch {
                roster_size,
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn champion(&self) -> EntityId {
        self.groups[self.groups.len() - 1][0]
    }

    pub fn runner_up(&self) -> Option<EntityId> {
        self.group_at_depth(1).and_then(|g| g.first().copied())
    }

    pub fn groups(&self) -> &[Vec<EntityId>] {
        &self.groups
    }

    pub fn group_at_depth(&self, depth: usize) -> Option<&[EntityId]> {
        let index = self.groups.len().checked_sub(depth + 1)?;
        self.groups.get(index).map(Vec::as_slice)
    }

    pub fn by_depth(&self) -> impl Iterator<Item = (usize, &[EntityId])> {
        by_depth(&self.groups)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.groups.iter().flatten().copied()
    }

    pub fn entity_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn summary(&self) -> PlacementSummary {
        let at = |depth| self.group_at_depth(depth).map(<[EntityId]>::to_vec).unwrap_or_default();
        PlacementSummary {
            winner: self.champion(),
            runner_up: self.runner_up(),
            semifinalists: at(2),
            quarterfinalists: at(3),
        }
    }
}

impl TryFrom<Vec<Vec<EntityId>>> for Placements {
    type Error = PlacementError;

    fn try_from(groups: Vec<Vec<EntityId>>) -> Result<Self, Self::Error> {
        Placements::from_groups(groups)
    }
}

impl From<Placements> for Vec<Vec<EntityId>> {
    fn from(placements: Placements) -> Self {
        placements.groups
    }
}
