// Points schedule keyed by depth from the champion.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bracket::Placements;
use crate::entity::EntityId;

/// Earliest round first; the last entry is the champion's award.
pub const DEFAULT_SCHEDULE: [i64; 8] = [0, 1, 3, 5, 8, 12, 18, 25];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("points schedule must have at least one entry")]
    Empty,

    #[error("points schedule entry {index} is negative ({value})")]
    Negative { index: usize, value: i64 },

    #[error("points schedule must not decrease toward the champion (entry {index})")]
    Decreasing { index: usize },
}

/// Fixed mapping from placement depth to points. Stored earliest round
/// first, so depth `d` reads entry `len - 1 - d`; depths past the start of
/// the schedule are worth nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<i64>")]
pub struct PointsSchedule {
    values: Vec<i64>,
}

/// Points earned by one entity in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointAward {
    pub entity_id: EntityId,
    pub depth: usize,
    pub points: i64,
}

impl PointsSchedule {
    pub fn new(values: Vec<i64>) -> Result<Self, ScheduleError> {
        if values.is_empty() {
            return Err(ScheduleError::Empty);
        }
        if let Some((index, &value)) = values.iter().enumerate().find(|(_, v)| **v < 0) {
            return Err(ScheduleError::Negative { index, value });
        }
        if let Some(index) = values.windows(2).position(|w| w[1] < w[0]) {
            return Err(ScheduleError::Decreasing { index: index + 1 });
        }
        Ok(PointsSchedule { values })
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn points_for_depth(&self, depth: usize) -> i64 {
        if depth >= self.values.len() {
            return 0;
        }
        self.values[self.values.len() - 1 - depth]
    }

    /// Per-entity awards for a completed run, earliest group first.
    pub fn awards(&self, placements: &Placements) -> Vec<PointAward> {
        placements
            .by_depth()
            .flat_map(|(depth, group)| {
                let points = self.points_for_depth(depth);
                group.iter().map(move |&entity_id| PointAward {
                    entity_id,
                    depth,
                    points,
                })
            })
            .collect()
    }

    pub fn total(&self, placements: &Placements) -> i64 {
        self.awards(placements).iter().map(|a| a.points).sum()
    }
}

impl Default for PointsSchedule {
    fn default() -> Self {
        PointsSchedule {
            values: DEFAULT_SCHEDULE.to_vec(),
        }
    }
}

impl TryFrom<Vec<i64>> for PointsSchedule {
    type Error = ScheduleError;

    fn try_from(values: Vec<i64>) -> Result<Self, Self::Error> {
        PointsSchedule::new(values)
    }
}

impl From<PointsSchedule> for Vec<i64> {
    fn from(schedule: PointsSchedule) -> Self {
        schedule.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_by_depth() {
        let schedule = PointsSchedule::default();
        assert_eq!(schedule.points_for_depth(0), 25);
        assert_eq!(schedule.points_for_depth(1), 18);
        assert_eq!(schedule.points_for_depth(2), 12);
        assert_eq!(schedule.points_for_depth(3), 8);
        assert_eq!(schedule.points_for_depth(7), 0);
    }

    #[test]
    fn depths_past_the_schedule_award_zero() {
        let schedule = PointsSchedule::new(vec![1, 3, 5, 8]).unwrap();
        assert_eq!(schedule.points_for_depth(3), 1);
        assert_eq!(schedule.points_for_depth(4), 0);
        assert_eq!(schedule.points_for_depth(100), 0);
    }

    #[test]
    fn five_entity_scenario_awards() {
        // E (prelim), D+C (semis), A (final), B champion.
        let placements =
            Placements::from_groups(vec![vec![5], vec![4, 3], vec![1], vec![2]]).unwrap();
        let schedule = PointsSchedule::new(vec![1, 3, 5, 8]).unwrap();

        let awards = schedule.awards(&placements);
        let points_of = |id| awards.iter().find(|a| a.entity_id == id).unwrap().points;
        assert_eq!(points_of(2), 8);
        assert_eq!(points_of(1), 5);
        assert_eq!(points_of(4), 3);
        assert_eq!(points_of(3), 3);
        assert_eq!(points_of(5), 1);
        assert_eq!(schedule.total(&placements), 20);
    }

    #[test]
    fn long_bracket_exhausts_schedule_without_error() {
        // Twelve rounds of losers, far deeper than a four-entry schedule.
        let mut groups: Vec<Vec<i64>> = (1..=12).map(|i| vec![i]).collect();
        groups.push(vec![99]);
        let placements = Placements::from_groups(groups).unwrap();
        let schedule = PointsSchedule::new(vec![1, 3, 5, 8]).unwrap();

        let awards = schedule.awards(&placements);
        assert_eq!(awards.len(), 13);
        assert!(awards.iter().filter(|a| a.depth >= 4).all(|a| a.points == 0));
        assert_eq!(schedule.total(&placements), 1 + 3 + 5 + 8);
    }

    #[test]
    fn rejects_invalid_schedules() {
        assert_eq!(PointsSchedule::new(vec![]).unwrap_err(), ScheduleError::Empty);
        assert_eq!(
            PointsSchedule::new(vec![0, -1, 3]).unwrap_err(),
            ScheduleError::Negative { index: 1, value: -1 }
        );
        assert_eq!(
            PointsSchedule::new(vec![0, 5, 3]).unwrap_err(),
            ScheduleError::Decreasing { index: 2 }
        );
        assert!(PointsSchedule::new(vec![2, 2, 2]).is_ok());
    }

    #[test]
    fn deserializes_through_validation() {
        let schedule: PointsSchedule = serde_json::from_str("[1,3,5,8]").unwrap();
        assert_eq!(schedule.values(), &[1, 3, 5, 8]);
        assert!(serde_json::from_str::<PointsSchedule>("[8,5]").is_err());
    }
}
