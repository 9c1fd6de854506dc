// Single-elimination bracket: construction, match sequencing, and the
// per-round record of eliminated entities.
//
// A bracket run is owned by exactly one voter session. Every transition takes
// the current `BracketState` by reference and returns the next one, so the
// engine can be driven and tested without any rendering layer.

pub mod builder;
pub mod labels;
pub mod placement;
pub mod sequencer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{Entity, EntityId};

pub use builder::{build, elimination_shape};
pub use labels::{match_view, round_label, MatchView, RoundLabel};
pub use placement::{PlacementError, PlacementGroups, PlacementSummary, Placements};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
    #[error("insufficient contestants: a bracket needs at least 2 entities, got {count}")]
    InsufficientContestants { count: usize },

    #[error("entity {0} appears more than once in the roster")]
    DuplicateEntity(EntityId),

    #[error("no match is in progress")]
    NoActiveMatch,

    #[error("entity {entity_id} is not part of the current match ({left} vs {right})")]
    InvalidSelection {
        entity_id: EntityId,
        left: EntityId,
        right: EntityId,
    },

    #[error("the tournament already has a champion")]
    TournamentAlreadyComplete,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Which part of the bracket is being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No roster has been bracketed yet.
    Setup,
    /// Play-in round that trims the roster down to a power of two.
    Preliminary,
    /// The power-of-two main draw.
    Main,
    /// A champion has been decided.
    Complete,
}

/// The complete state of one voter's tournament run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketState {
    pub phase: Phase,
    /// Entities playing the current round, paired as `[2i, 2i + 1]`.
    pub contestants: Vec<Entity>,
    /// Entities waiting out the preliminary round.
    pub byes: Vec<Entity>,
    /// Winners of the current round so far, in match order.
    pub winners: Vec<Entity>,
    /// Index of the match being decided within the current round.
    pub match_index: usize,
    /// 1-based round counter within the current phase.
    pub round_number: u32,
    /// Losers of every finished round, earliest first.
    pub eliminated: PlacementGroups,
    pub champion: Option<Entity>,
    /// Roster size the bracket was built from.
    pub roster_size: usize,
}

impl Default for BracketState {
    fn default() -> Self {
        BracketState {
            phase: Phase::Setup,
            contestants: Vec::new(),
            byes: Vec::new(),
            winners: Vec::new(),
            match_index: 0,
            round_number: 1,
            eliminated: PlacementGroups::default(),
            champion: None,
            roster_size: 0,
        }
    }
}

impl BracketState {
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Number of matches in the round currently being played.
    pub fn match_count(&self) -> usize {
        self.contestants.len() / 2
    }

    /// The finished run's placement groups, champion last. `None` until the
    /// tournament is complete.
    pub fn placements(&self) -> Option<Placements> {
        let champion = self.champion.as_ref()?;
        Some(self.eliminated.clone().finish(champion.id))
    }
}
