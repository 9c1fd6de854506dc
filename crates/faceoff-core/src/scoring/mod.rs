// Placement -> points conversion and leaderboard reconciliation.

pub mod reconcile;
pub mod schedule;

pub use reconcile::{ReconcileAck, ReconcileError, RebuildReport, RetryPolicy, ScoreReconciler};
pub use schedule::{PointAward, PointsSchedule, ScheduleError, DEFAULT_SCHEDULE};
