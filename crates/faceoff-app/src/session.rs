// Per-connection voter session: the bracket run in progress and the RNG that
// shuffles it.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use faceoff_core::bracket::{self, BracketError, BracketState};
use faceoff_core::entity::{Entity, EntityId};

pub struct Session {
    addr: String,
    rng: StdRng,
    bracket: Option<BracketState>,
}

impl Session {
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_rng(addr, StdRng::from_entropy())
    }

    /// Session with a caller-supplied RNG, for reproducible brackets.
    pub fn with_rng(addr: impl Into<String>, rng: StdRng) -> Self {
        Session {
            addr: addr.into(),
            rng,
            bracket: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn bracket(&self) -> Option<&BracketState> {
        self.bracket.as_ref()
    }

    /// Shuffle `roster` into a new bracket, replacing any run in progress.
    /// On error the previous run is kept.
    pub fn start(&mut self, mut roster: Vec<Entity>) -> Result<&BracketState, BracketError> {
        roster.shuffle(&mut self.rng);
        let state = bracket::build(roster)?;
        Ok(self.bracket.insert(state))
    }

    /// Decide the current match. On error the run is left unchanged.
    pub fn select(&mut self, entity_id: EntityId) -> Result<&BracketState, BracketError> {
        let current = self.bracket.as_ref().ok_or(BracketError::NoActiveMatch)?;
        let next = current.select_winner(entity_id, &mut self.rng)?;
        Ok(self.bracket.insert(next))
    }
}
