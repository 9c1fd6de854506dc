// Bracket construction for arbitrary roster sizes.

use std::collections::HashSet;

use super::{BracketError, BracketState, Phase};
use crate::entity::Entity;

/// Largest power of two that is `<= n`. `n` must be non-zero.
fn largest_power_of_two(n: usize) -> usize {
    1 << (usize::BITS - 1 - n.leading_zeros())
}

/// Number of entities that must play a preliminary match so the main draw
/// is a power of two. Zero when `n` already is one.
pub fn preliminary_size(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    2 * (n - largest_power_of_two(n))
}

/// Build a bracket from a roster whose order has already been shuffled.
///
/// A power-of-two roster goes straight into the main draw. Otherwise the last
/// `2 * (n - p)` entities (where `p` is the largest power of two below `n`)
/// play a preliminary round and the leading entities receive byes.
pub fn build(roster: Vec<Entity>) -> Result<BracketState, BracketError> {
    let n = roster.len();
    if n < 2 {
        return Err(BracketError::InsufficientContestants { count: n });
    }

    let mut seen = HashSet::with_capacity(n);
    for entity in &roster {
        if !seen.insert(entity.id) {
            return Err(BracketError::DuplicateEntity(entity.id));
        }
    }

    let prelim = preliminary_size(n);
    let mut state = BracketState {
        roster_size: n,
        ..BracketState::default()
    };

    if prelim == 0 {
        state.phase = Phase::Main;
        state.contestants = roster;
    } else {
        let mut byes = roster;
        let contestants = byes.split_off(n - prelim);
        state.phase = Phase::Preliminary;
        state.byes = byes;
        state.contestants = contestants;
    }

    Ok(state)
}

/// Sizes of the loser groups a completed bracket over `n` entities produces,
/// earliest round first. The champion is not included.
///
/// For five entities this is `[1, 2, 1]`: one preliminary loser, two
/// semifinal losers, one runner-up.
pub fn elimination_shape(n: usize) -> Result<Vec<usize>, BracketError> {
    if n < 2 {
        return Err(BracketError::InsufficientContestants { count: n });
    }

    let mut shape = Vec::new();
    let prelim = preliminary_size(n);
    if prelim > 0 {
        shape.push(prelim / 2);
    }

    let mut remaining = largest_power_of_two(n);
    while remaining > 1 {
        shape.push(remaining / 2);
        remaining /= 2;
    }

    Ok(shape)
}
