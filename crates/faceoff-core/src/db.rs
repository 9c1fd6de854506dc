// SQLite persistence for the roster, per-entity point totals, voter
// submissions and key-value app state.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{info, warn};

use crate::bracket::Placements;
use crate::entity::{Entity, EntityId};
use crate::ledger::{Ledger, LedgerError, LedgerTx, PriorSubmission, Standing};

/// SQLite-backed store for entities, point totals, submissions and app state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Key holding the roster file's modification time (RFC 3339 string).
    pub const ROSTER_UPDATED_AT_KEY: &'static str = "roster_updated_at";
    /// Key holding `true` while point totals need a rebuild from submissions.
    pub const TOTALS_STALE_KEY: &'static str = "totals_stale";
    /// Key holding the points schedule the totals were computed with.
    pub const SCHEDULE_KEY: &'static str = "points_schedule";

    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entities (
                id     INTEGER PRIMARY KEY,
                name   TEXT NOT NULL,
                image  TEXT NOT NULL DEFAULT '',
                points INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS submissions (
                voter_id     TEXT PRIMARY KEY,
                placements   TEXT NOT NULL,
                champion_id  INTEGER NOT NULL,
                submitted_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS app_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        // Databases written by the fixed-depth submission layout keep the old
        // table around because CREATE TABLE IF NOT EXISTS skips it.
        Self::migrate_legacy_submissions(&mut conn)?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_submissions_champion ON submissions(champion_id);",
        )
        .context("failed to create champion index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Rebuild a `submissions` table in the fixed-depth layout
    /// (`userId, winnerId, runnerUpId, [semiFinalistIds], quarterFinalistIds`)
    /// into the placement-group layout.
    ///
    /// Each legacy row becomes `[quarterfinal losers, semifinal losers,
    /// [runner-up], [winner]]`. Missing levels are kept as empty groups so
    /// every id stays at its original depth. Totals are flagged stale because
    /// the legacy scheme scored differently.
    ///
    /// No-op when the table already has the `voter_id` column.
    fn migrate_legacy_submissions(conn: &mut Connection) -> Result<()> {
        let has_voter_id = conn
            .prepare("SELECT voter_id FROM submissions LIMIT 0")
            .is_ok();
        if has_voter_id {
            return Ok(());
        }

        let has_semis = conn
            .prepare("SELECT semiFinalistIds FROM submissions LIMIT 0")
            .is_ok();
        let semis_column = if has_semis { "semiFinalistIds" } else { "NULL" };

        let tx = conn
            .transaction()
            .context("failed to begin legacy migration")?;

        tx.execute_batch(
            "
            ALTER TABLE submissions RENAME TO submissions_legacy;

            CREATE TABLE submissions (
                voter_id     TEXT PRIMARY KEY,
                placements   TEXT NOT NULL,
                champion_id  INTEGER NOT NULL,
                submitted_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            ",
        )
        .context("failed to create submissions table for migration")?;

        let rows: Vec<LegacyRow> = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT userId, winnerId, runnerUpId, {semis_column}, quarterFinalistIds
                     FROM submissions_legacy"
                ))
                .context("failed to prepare legacy submissions query")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LegacyRow {
                        voter_id: row.get(0)?,
                        winner: row.get(1)?,
                        runner_up: row.get(2)?,
                        semifinalists: row.get(3)?,
                        quarterfinalists: row.get(4)?,
                    })
                })
                .context("failed to query legacy submissions")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map legacy submission rows")?;
            rows
        };

        for row in &rows {
            let groups = row.to_groups();
            let placements_json =
                serde_json::to_string(&groups).context("failed to serialize placements")?;
            tx.execute(
                "INSERT INTO submissions (voter_id, placements, champion_id) VALUES (?1, ?2, ?3)",
                params![row.voter_id, placements_json, row.winner],
            )
            .context("failed to insert migrated submission")?;
        }

        tx.execute_batch("DROP TABLE submissions_legacy;")
            .context("failed to drop legacy submissions table")?;
        write_state(&tx, Self::TOTALS_STALE_KEY, &serde_json::Value::Bool(true))
            .context("failed to flag totals as stale")?;
        tx.commit().context("failed to commit legacy migration")?;

        info!("migrated {} legacy submission(s)", rows.len());
        Ok(())
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Insert the roster when the `entities` table is empty; an already
    /// populated table is left alone so accumulated points survive restarts.
    /// The roster timestamp is recorded either way. Returns the number of
    /// entities inserted.
    pub fn seed_roster(
        &self,
        roster: &[Entity],
        updated_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin seed transaction")?;

        let existing: i64 = tx
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .context("failed to count entities")?;

        let mut inserted = 0;
        if existing == 0 {
            let mut stmt = tx
                .prepare("INSERT INTO entities (id, name, image, points) VALUES (?1, ?2, ?3, 0)")
                .context("failed to prepare entity insert")?;
            for entity in roster {
                stmt.execute(params![entity.id, entity.name, entity.image])
                    .with_context(|| format!("failed to insert entity {}", entity.id))?;
                inserted += 1;
            }
        }

        if let Some(updated_at) = updated_at {
            write_state(
                &tx,
                Self::ROSTER_UPDATED_AT_KEY,
                &serde_json::Value::String(updated_at.to_rfc3339()),
            )
            .context("failed to record roster timestamp")?;
        }

        tx.commit().context("failed to commit roster seed")?;
        Ok(inserted)
    }

    /// All entities, ordered by id.
    pub fn load_roster(&self) -> Result<Vec<Entity>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, image FROM entities ORDER BY id")
            .context("failed to prepare load_roster query")?;

        let entities = stmt
            .query_map([], |row| {
                Ok(Entity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    image: row.get(2)?,
                })
            })
            .context("failed to query entities")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map entity rows")?;

        Ok(entities)
    }

    pub fn entity_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .context("failed to count entities")?;
        Ok(count as usize)
    }

    /// Whether point totals must be rebuilt from stored submissions.
    pub fn totals_stale(&self) -> Result<bool> {
        let value = self.load_state(Self::TOTALS_STALE_KEY)?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        read_state(&conn, key)
    }
}

impl Database {
    fn run_transaction<T, E, F>(&self, behavior: TransactionBehavior, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn LedgerTx) -> std::result::Result<T, E>,
        E: From<LedgerError>,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(|e| E::from(LedgerError::from(e)))?;

        // Dropping `tx` on the error path rolls back.
        let value = f(&SqliteTx { conn: &tx })?;

        tx.commit().map_err(|e| E::from(LedgerError::from(e)))?;
        Ok(value)
    }
}

impl Ledger for Database {
    /// `BEGIN IMMEDIATE`: the write lock is taken up front, so two writers
    /// never both read the same prior state.
    fn in_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn LedgerTx) -> std::result::Result<T, E>,
        E: From<LedgerError>,
    {
        self.run_transaction(TransactionBehavior::Immediate, f)
    }

    /// `BEGIN DEFERRED`: under WAL a reader sees the last committed snapshot
    /// and never waits on writers.
    fn read_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&dyn LedgerTx) -> std::result::Result<T, E>,
        E: From<LedgerError>,
    {
        self.run_transaction(TransactionBehavior::Deferred, f)
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                LedgerError::Busy(err.to_string())
            }
            _ => LedgerError::Storage(anyhow::Error::new(err)),
        }
    }
}

/// `LedgerTx` over an open rusqlite transaction.
struct SqliteTx<'c> {
    conn: &'c Connection,
}

impl LedgerTx for SqliteTx<'_> {
    fn entity_count(&self) -> std::result::Result<usize, LedgerError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn missing_entities(
        &self,
        ids: &[EntityId],
    ) -> std::result::Result<Vec<EntityId>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM entities WHERE id = ?1)")?;
        let mut missing = Vec::new();
        for &id in ids {
            let exists: bool = stmt.query_row(params![id], |row| row.get(0))?;
            if !exists {
                missing.push(id);
            }
        }
        Ok(missing)
    }

    fn load_submission(
        &self,
        voter_id: &str,
    ) -> std::result::Result<Option<PriorSubmission>, LedgerError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT placements FROM submissions WHERE voter_id = ?1",
                params![voter_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|json| decode_placements(&json)))
    }

    fn adjust_points(
        &self,
        ids: &[EntityId],
        delta: i64,
    ) -> std::result::Result<(), LedgerError> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE entities SET points = points + ?1 WHERE id = ?2")?;
        for &id in ids {
            stmt.execute(params![delta, id])?;
        }
        Ok(())
    }

    fn upsert_submission(
        &self,
        voter_id: &str,
        placements: &Placements,
    ) -> std::result::Result<(), LedgerError> {
        let placements_json = serde_json::to_string(placements.groups())
            .context("failed to serialize placements")?;
        self.conn.execute(
            "INSERT INTO submissions (voter_id, placements, champion_id, submitted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(voter_id) DO UPDATE SET
                placements   = excluded.placements,
                champion_id  = excluded.champion_id,
                submitted_at = excluded.submitted_at",
            params![
                voter_id,
                placements_json,
                placements.champion(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn standings(&self) -> std::result::Result<Vec<Standing>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, image, points FROM entities ORDER BY id")?;
        let standings = stmt
            .query_map([], |row| {
                Ok(Standing {
                    entity: Entity {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        image: row.get(2)?,
                    },
                    points: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(standings)
    }

    fn champion_counts(&self) -> std::result::Result<HashMap<EntityId, u32>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT champion_id, COUNT(*) FROM submissions GROUP BY champion_id")?;
        let counts = stmt
            .query_map([], |row| {
                let id: EntityId = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((id, count as u32))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(counts)
    }

    fn submission_count(&self) -> std::result::Result<usize, LedgerError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM submissions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn all_submissions(
        &self,
    ) -> std::result::Result<Vec<(String, PriorSubmission)>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT voter_id, placements FROM submissions ORDER BY voter_id")?;
        let rows = stmt
            .query_map([], |row| {
                let voter_id: String = row.get(0)?;
                let json: String = row.get(1)?;
                Ok((voter_id, json))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(voter_id, json)| (voter_id, decode_placements(&json)))
            .collect())
    }

    fn reset_points(&self) -> std::result::Result<(), LedgerError> {
        self.conn.execute("UPDATE entities SET points = 0", [])?;
        Ok(())
    }

    fn roster_updated_at(&self) -> std::result::Result<Option<DateTime<Utc>>, LedgerError> {
        let value = read_state(self.conn, Database::ROSTER_UPDATED_AT_KEY)?;
        let Some(raw) = value.as_ref().and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                warn!("ignoring unreadable roster timestamp {raw:?}: {e}");
                Ok(None)
            }
        }
    }

    fn totals_stale(&self) -> std::result::Result<bool, LedgerError> {
        let value = read_state(self.conn, Database::TOTALS_STALE_KEY)?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn set_totals_stale(&self, stale: bool) -> std::result::Result<(), LedgerError> {
        write_state(
            self.conn,
            Database::TOTALS_STALE_KEY,
            &serde_json::Value::Bool(stale),
        )?;
        Ok(())
    }

    fn schedule_stamp(&self) -> std::result::Result<Option<Vec<i64>>, LedgerError> {
        let Some(value) = read_state(self.conn, Database::SCHEDULE_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_value::<Vec<i64>>(value) {
            Ok(values) => Ok(Some(values)),
            Err(e) => {
                warn!("ignoring unreadable schedule stamp: {e}");
                Ok(None)
            }
        }
    }

    fn set_schedule_stamp(&self, values: &[i64]) -> std::result::Result<(), LedgerError> {
        write_state(
            self.conn,
            Database::SCHEDULE_KEY,
            &serde_json::Value::from(values.to_vec()),
        )?;
        Ok(())
    }
}

fn write_state(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
    let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
    conn.execute(
        "INSERT OR REPLACE INTO app_state (key, value) VALUES (?1, ?2)",
        params![key, json_str],
    )
    .context("failed to save state")?;
    Ok(())
}

fn read_state(conn: &Connection, key: &str) -> Result<Option<serde_json::Value>> {
    let json_str: Option<String> = conn
        .query_row(
            "SELECT value FROM app_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("failed to query app state")?;

    match json_str {
        Some(json_str) => {
            let value: serde_json::Value =
                serde_json::from_str(&json_str).context("failed to deserialize state value")?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn decode_placements(json: &str) -> PriorSubmission {
    match serde_json::from_str::<Vec<Vec<EntityId>>>(json) {
        Ok(groups) => PriorSubmission::Groups(groups),
        Err(e) => PriorSubmission::Unreadable {
            reason: e.to_string(),
        },
    }
}

/// One row of the fixed-depth submission layout.
struct LegacyRow {
    voter_id: String,
    winner: EntityId,
    runner_up: Option<EntityId>,
    semifinalists: Option<String>,
    quarterfinalists: Option<String>,
}

impl LegacyRow {
    /// Legacy semifinal and quarterfinal lists included the entities that
    /// went on to win those rounds; only the losers of each level are kept.
    fn to_groups(&self) -> Vec<Vec<EntityId>> {
        let mut placed: HashSet<EntityId> = HashSet::new();
        placed.insert(self.winner);

        let runner_up: Vec<EntityId> = self
            .runner_up
            .filter(|id| placed.insert(*id))
            .into_iter()
            .collect();

        let semis: Vec<EntityId> = parse_legacy_ids(&self.voter_id, self.semifinalists.as_deref())
            .into_iter()
            .filter(|id| placed.insert(*id))
            .collect();

        let quarters: Vec<EntityId> =
            parse_legacy_ids(&self.voter_id, self.quarterfinalists.as_deref())
                .into_iter()
                .filter(|id| placed.insert(*id))
                .collect();

        vec![quarters, semis, runner_up, vec![self.winner]]
    }
}

fn parse_legacy_ids(voter_id: &str, raw: Option<&str>) -> Vec<EntityId> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("dropping unreadable legacy id list for voter {voter_id}: {e}");
        Vec::new()
    })
}
