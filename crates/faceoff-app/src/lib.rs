// Voter-facing application layer: per-connection sessions and request
// dispatch on top of the tournament engine.

pub mod app;
pub mod session;

pub use app::{App, AppError};
pub use session::Session;
