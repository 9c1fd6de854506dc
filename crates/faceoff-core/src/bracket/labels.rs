// Round names and match views for display. Derived from the bracket state;
// never consulted by the state machine itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{BracketState, Phase};
use crate::entity::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundLabel {
    Preliminary,
    Finals,
    SemiFinals,
    QuarterFinals,
    RoundOf(usize),
    Round(u32),
    Winner,
}

impl fmt::Display for RoundLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundLabel::Preliminary => write!(f, "Preliminary Round"),
            RoundLabel::Finals => write!(f, "Finals"),
            RoundLabel::SemiFinals => write!(f, "Semi-Finals"),
            RoundLabel::QuarterFinals => write!(f, "Quarter-Finals"),
            RoundLabel::RoundOf(n) => write!(f, "Round of {n}"),
            RoundLabel::Round(n) => write!(f, "Round {n}"),
            RoundLabel::Winner => write!(f, "Winner!"),
        }
    }
}

pub fn round_label(state: &BracketState) -> RoundLabel {
    match state.phase {
        Phase::Complete => RoundLabel::Winner,
        Phase::Preliminary => RoundLabel::Preliminary,
        Phase::Setup | Phase::Main => match state.contestants.len() {
            2 => RoundLabel::Finals,
            4 => RoundLabel::SemiFinals,
            8 => RoundLabel::QuarterFinals,
            n if n > 8 && n.is_power_of_two() => RoundLabel::RoundOf(n),
            _ => RoundLabel::Round(state.round_number),
        },
    }
}

/// What a voter is shown for the match being decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    pub label: String,
    /// 1-based position of this match within the round.
    pub match_number: usize,
    pub match_count: usize,
    pub left: Entity,
    pub right: Entity,
}

pub fn match_view(state: &BracketState) -> Option<MatchView> {
    let (left, right) = state.current_match().ok()?;
    Some(MatchView {
        label: round_label(state).to_string(),
        match_number: state.match_index + 1,
        match_count: state.match_count(),
        left: left.clone(),
        right: right.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::build;

    fn roster(n: usize) -> Vec<Entity> {
        (1..=n as i64)
            .map(|i| Entity::new(i, format!("Entity {i}"), String::new()))
            .collect()
    }

    fn main_draw(n: usize) -> BracketState {
        BracketState {
            phase: Phase::Main,
            contestants: roster(n),
            ..BracketState::default()
        }
    }

    #[test]
    fn labels_follow_contestant_count() {
        assert_eq!(round_label(&main_draw(2)).to_string(), "Finals");
        assert_eq!(round_label(&main_draw(4)).to_string(), "Semi-Finals");
        assert_eq!(round_label(&main_draw(8)).to_string(), "Quarter-Finals");
        assert_eq!(round_label(&main_draw(16)).to_string(), "Round of 16");
        assert_eq!(round_label(&main_draw(64)).to_string(), "Round of 64");
    }

    #[test]
    fn non_power_of_two_main_round_falls_back_to_number() {
        let mut state = main_draw(6);
        state.round_number = 3;
        assert_eq!(round_label(&state).to_string(), "Round 3");
    }

    #[test]
    fn preliminary_and_complete_labels() {
        let state = build(roster(5)).unwrap();
        assert_eq!(round_label(&state).to_string(), "Preliminary Round");

        let done = BracketState {
            phase: Phase::Complete,
            ..BracketState::default()
        };
        assert_eq!(round_label(&done).to_string(), "Winner!");
    }

    #[test]
    fn match_view_reports_position_in_round() {
        let state = build(roster(8)).unwrap();
        let view = match_view(&state).unwrap();
        assert_eq!(view.label, "Quarter-Finals");
        assert_eq!(view.match_number, 1);
        assert_eq!(view.match_count, 4);
        assert_eq!(view.left.id, 1);
        assert_eq!(view.right.id, 2);

        assert!(match_view(&BracketState::default()).is_none());
    }
}
