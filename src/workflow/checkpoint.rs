//! SQLite-backed checkpoints: one row per run plus the serialized
//! `RunState` after each completed transition.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::state::{RunState, Step};
use crate::error::{CovboostError, Result};

pub const SCHEMA_VERSION: u32 = 1;

/// Checkpoint rows kept per run.
pub const HISTORY_LIMIT: u64 = 16;

const SCHEMA: &str = include_str!("../schema.sql");

/// Open (or create) the checkpoint database at the given path.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// Ensure the schema is initialized. Safe to call on an already-initialized DB.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: u32 = conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?;
    if count == 0 {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        return Ok(());
    }

    let version: u32 =
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(CovboostError::Other(format!(
            "Checkpoint schema version {version} is newer than this binary supports ({SCHEMA_VERSION}). \
             Please upgrade covboost."
        )));
    }
    if version < SCHEMA_VERSION {
        return Err(CovboostError::Other(format!(
            "Checkpoint schema version {version} is older than this binary supports ({SCHEMA_VERSION}). \
             Delete the checkpoint database to start over."
        )));
    }
    Ok(())
}

/// Register a new run and store its starting state. A run name can only be
/// started once.
pub fn start_run(conn: &mut Connection, state: &RunState) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let repo = state
        .repo_url
        .clone()
        .unwrap_or_else(|| state.repo_path.display().to_string());

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO run (name, repo, step, finished, created_at, updated_at) \
         VALUES (?1, ?2, ?3, 0, ?4, ?4)",
        params![state.run_id, repo, state.step.as_str(), now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CovboostError::RunConflict(format!(
                "run '{}' already exists. Use `resume` to continue it, or pick another --run-id.",
                state.run_id
            ))
        }
        other => CovboostError::Sqlite(other),
    })?;
    let run_pk = tx.last_insert_rowid();
    insert_checkpoint(&tx, run_pk, state, &now)?;
    tx.commit()?;

    info!(run = %state.run_id, repo = %repo, "run started");
    Ok(())
}

/// Store the state reached after a transition.
pub fn save(conn: &mut Connection, state: &RunState) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    let run_pk: i64 = tx
        .query_row(
            "SELECT id FROM run WHERE name = ?1",
            params![state.run_id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                CovboostError::Other(format!("run '{}' has not been started", state.run_id))
            }
            other => CovboostError::Sqlite(other),
        })?;

    tx.execute(
        "UPDATE run SET step = ?1, finished = ?2, updated_at = ?3 WHERE id = ?4",
        params![state.step.as_str(), state.is_finished(), now, run_pk],
    )?;
    insert_checkpoint(&tx, run_pk, state, &now)?;

    if state.transitions >= HISTORY_LIMIT {
        let pruned = tx.execute(
            "DELETE FROM checkpoint WHERE run_id = ?1 AND transition <= ?2",
            params![run_pk, (state.transitions - HISTORY_LIMIT) as i64],
        )?;
        if pruned > 0 {
            debug!(run = %state.run_id, pruned, "pruned checkpoint history");
        }
    }
    tx.commit()?;
    Ok(())
}

fn insert_checkpoint(
    tx: &rusqlite::Transaction,
    run_pk: i64,
    state: &RunState,
    now: &str,
) -> Result<()> {
    let json = serde_json::to_string(state)?;
    tx.execute(
        "INSERT OR REPLACE INTO checkpoint (run_id, transition, step, state, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run_pk, state.transitions as i64, state.step.as_str(), json, now],
    )?;
    Ok(())
}

/// The most recent checkpoint of a run, `None` when the run is unknown.
pub fn load_latest(conn: &Connection, run_id: &str) -> Result<Option<RunState>> {
    let mut stmt = conn.prepare(
        "SELECT c.state FROM checkpoint c JOIN run r ON r.id = c.run_id \
         WHERE r.name = ?1 ORDER BY c.transition DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![run_id])?;
    match rows.next()? {
        Some(row) => {
            let json: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&json)?))
        }
        None => Ok(None),
    }
}

/// One line of the run listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub name: String,
    pub repo: String,
    pub step: String,
    pub finished: bool,
    pub created_at: String,
    pub updated_at: String,
    pub checkpoints: u64,
}

/// All runs, oldest first.
pub fn list_runs(conn: &Connection) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT r.name, r.repo, r.step, r.finished, r.created_at, r.updated_at, \
                (SELECT COUNT(*) FROM checkpoint c WHERE c.run_id = r.id) \
         FROM run r ORDER BY r.created_at, r.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RunRecord {
            name: row.get(0)?,
            repo: row.get(1)?,
            step: row.get(2)?,
            finished: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            checkpoints: row.get::<_, i64>(6)? as u64,
        })
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// `(transition, step)` pairs still stored for a run, oldest first.
pub fn history(conn: &Connection, run_id: &str) -> Result<Vec<(u64, Step)>> {
    let mut stmt = conn.prepare(
        "SELECT c.transition, c.step FROM checkpoint c JOIN run r ON r.id = c.run_id \
         WHERE r.name = ?1 ORDER BY c.transition",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut result = Vec::new();
    for row in rows {
        let (transition, step) = row?;
        let step = Step::parse(&step)
            .ok_or_else(|| CovboostError::Other(format!("unknown step '{step}' in checkpoint")))?;
        result.push((transition as u64, step));
    }
    Ok(result)
}
