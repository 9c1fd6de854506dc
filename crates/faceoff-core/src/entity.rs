// Roster members.

use serde::{Deserialize, Serialize};

/// Stable identifier of a roster entity.
pub type EntityId = i64;

/// An immutable roster member. Created when the roster is seeded and never
/// mutated by the bracket or scoring engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    /// Image reference (URL or asset path) shown next to the entity.
    pub image: String,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>, image: impl Into<String>) -> Self {
        Entity {
            id,
            name: name.into(),
            image: image.into(),
        }
    }
}
