// Match sequencing: setup -> preliminary|main, preliminary -> main,
// main -> complete.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use super::{BracketError, BracketState, Phase};
use crate::entity::{Entity, EntityId};

impl BracketState {
    /// The pair playing the current match.
    pub fn current_match(&self) -> Result<(&Entity, &Entity), BracketError> {
        match self.phase {
            Phase::Complete => return Err(BracketError::TournamentAlreadyComplete),
            Phase::Setup => return Err(BracketError::NoActiveMatch),
            Phase::Preliminary | Phase::Main => {}
        }

        let left = self.contestants.get(2 * self.match_index);
        let right = self.contestants.get(2 * self.match_index + 1);
        match (left, right) {
            (Some(left), Some(right)) => Ok((left, right)),
            _ => Err(BracketError::NoActiveMatch),
        }
    }

    /// Decide the current match in favour of `winner_id` and return the next
    /// state.
    ///
    /// When this finishes a round, the round's losers are recorded as a new
    /// placement group. Preliminary winners are merged with the byes and
    /// reshuffled with `rng` to form the main draw; in the main draw a single
    /// remaining winner becomes the champion.
    pub fn select_winner<R: Rng + ?Sized>(
        &self,
        winner_id: EntityId,
        rng: &mut R,
    ) -> Result<BracketState, BracketError> {
        let (left, right) = self.current_match()?;
        let winner = if winner_id == left.id {
            left.clone()
        } else if winner_id == right.id {
            right.clone()
        } else {
            return Err(BracketError::InvalidSelection {
                entity_id: winner_id,
                left: left.id,
                right: right.id,
            });
        };

        let mut next = self.clone();
        next.winners.push(winner);
        next.match_index += 1;

        if next.match_index * 2 < next.contestants.len() {
            return Ok(next);
        }

        next.eliminated = next.eliminated.record_round_losers(round_losers(&next));

        match next.phase {
            Phase::Preliminary => {
                let mut draw = std::mem::take(&mut next.byes);
                draw.append(&mut next.winners);
                draw.shuffle(rng);
                next.contestants = draw;
                next.match_index = 0;
                next.round_number = 1;
                next.phase = Phase::Main;
            }
            _ => {
                if next.winners.len() == 1 {
                    next.champion = next.winners.pop();
                    next.contestants.clear();
                    next.match_index = 0;
                    next.phase = Phase::Complete;
                } else {
                    next.contestants = std::mem::take(&mut next.winners);
                    next.match_index = 0;
                    next.round_number += 1;
                }
            }
        }

        Ok(next)
    }
}

/// Contestants of the finished round who are not among its winners.
fn round_losers(state: &BracketState) -> Vec<EntityId> {
    let winners: HashSet<EntityId> = state.winners.iter().map(|e| e.id).collect();
    state
        .contestants
        .iter()
        .map(|e| e.id)
        .filter(|id| !winners.contains(id))
        .collect()
}
