// Roster file loading (JSON array or CSV with an `id,name,image` header).

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::entity::{Entity, EntityId};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("unsupported roster format for {path}: expected .json or .csv")]
    UnsupportedFormat { path: String },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Raw serde struct
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEntity {
    id: EntityId,
    name: String,
    #[serde(default)]
    image: String,
}

impl From<RawEntity> for Entity {
    fn from(raw: RawEntity) -> Self {
        Entity::new(raw.id, raw.name.trim(), raw.image.trim())
    }
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

fn load_csv_from_reader<R: Read>(rdr: R) -> Result<Vec<Entity>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut entities = Vec::new();
    for result in reader.deserialize::<RawEntity>() {
        match result {
            Ok(raw) => entities.push(raw.into()),
            Err(e) => {
                warn!("skipping malformed roster row: {}", e);
            }
        }
    }
    Ok(entities)
}

fn load_json_from_reader<R: Read>(rdr: R) -> Result<Vec<Entity>, serde_json::Error> {
    let raw: Vec<RawEntity> = serde_json::from_reader(rdr)?;
    Ok(raw.into_iter().map(Entity::from).collect())
}

/// Reject rosters that cannot form a bracket or would make placements
/// ambiguous.
fn validate(entities: &[Entity]) -> Result<(), RosterError> {
    if entities.is_empty() {
        return Err(RosterError::Validation("roster produced zero valid rows".into()));
    }
    let mut seen = HashSet::new();
    for entity in entities {
        if entity.name.is_empty() {
            return Err(RosterError::Validation(format!(
                "entity {} has an empty name",
                entity.id
            )));
        }
        if !seen.insert(entity.id) {
            return Err(RosterError::Validation(format!(
                "entity id {} appears more than once",
                entity.id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

/// Load a roster file, choosing the format from its extension.
pub fn load_roster(path: &Path) -> Result<Vec<Entity>, RosterError> {
    let display = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let file = std::fs::File::open(path).map_err(|e| RosterError::Io {
        path: display.clone(),
        source: e,
    })?;

    let entities = match extension.as_deref() {
        Some("json") => load_json_from_reader(file).map_err(|e| RosterError::Json {
            path: display,
            source: e,
        })?,
        Some("csv") => load_csv_from_reader(file).map_err(|e| RosterError::Csv {
            path: display,
            source: e,
        })?,
        _ => return Err(RosterError::UnsupportedFormat { path: display }),
    };

    validate(&entities)?;
    Ok(entities)
}

/// Modification time of the roster file, if the platform reports one.
pub fn roster_modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn csv_roster_loads_and_trims() {
        let data = "id,name,image\n1, Alpha ,img/a.png\n2,Beta,img/b.png\n";
        let entities = load_csv_from_reader(data.as_bytes()).unwrap();
        assert_eq!(
            entities,
            vec![
                Entity::new(1, "Alpha", "img/a.png"),
                Entity::new(2, "Beta", "img/b.png"),
            ]
        );
    }

    #[test]
    fn csv_image_column_is_optional() {
        let data = "id,name\n1,Alpha\n";
        let entities = load_csv_from_reader(data.as_bytes()).unwrap();
        assert_eq!(entities, vec![Entity::new(1, "Alpha", "")]);
    }

    #[test]
    fn malformed_csv_rows_skipped() {
        let data = "id,name,image\n1,Alpha,a.png\nnot-a-number,Beta,b.png\n3,Gamma,c.png\n";
        let entities = load_csv_from_reader(data.as_bytes()).unwrap();
        let ids: Vec<EntityId> = entities.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn json_roster_loads() {
        let data = r#"[{"id": 7, "name": "Seven", "image": "7.png"}, {"id": 8, "name": "Eight"}]"#;
        let entities = load_json_from_reader(data.as_bytes()).unwrap();
        assert_eq!(entities[0], Entity::new(7, "Seven", "7.png"));
        assert_eq!(entities[1].image, "");
    }

    #[test]
    fn validation_rejects_duplicates_and_blank_names() {
        let dupes = vec![Entity::new(1, "A", ""), Entity::new(1, "B", "")];
        assert!(matches!(validate(&dupes), Err(RosterError::Validation(_))));

        let blank = vec![Entity::new(1, "", "")];
        assert!(matches!(validate(&blank), Err(RosterError::Validation(_))));

        assert!(matches!(validate(&[]), Err(RosterError::Validation(_))));
    }

    #[test]
    fn load_roster_picks_format_by_extension() {
        let tmp = std::env::temp_dir().join(format!("faceoff_roster_test_{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let json_path = tmp.join("roster.json");
        fs::write(&json_path, r#"[{"id": 1, "name": "One"}, {"id": 2, "name": "Two"}]"#).unwrap();
        assert_eq!(load_roster(&json_path).unwrap().len(), 2);
        assert!(roster_modified_at(&json_path).is_some());

        let csv_path = tmp.join("roster.CSV");
        fs::write(&csv_path, "id,name,image\n1,One,\n").unwrap();
        assert_eq!(load_roster(&csv_path).unwrap().len(), 1);

        let txt_path = tmp.join("roster.txt");
        fs::write(&txt_path, "whatever").unwrap();
        assert!(matches!(
            load_roster(&txt_path),
            Err(RosterError::UnsupportedFormat { .. })
        ));

        assert!(matches!(
            load_roster(&tmp.join("missing.json")),
            Err(RosterError::Io { .. })
        ));

        let _ = fs::remove_dir_all(&tmp);
    }
}
