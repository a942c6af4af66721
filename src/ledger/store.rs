//! SQLite checkpoint store: work items, per-stage task ledger, problem
//! vocabulary and escalation records.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FatalError;

/// Ledger value marking a stage that no tier could complete.
pub const FAILED_SENTINEL: &str = "!failed";
/// Ledger value marking a stage that did not run because one of its
/// prerequisites failed in the same attempt.
pub const BLOCKED_SENTINEL: &str = "!blocked";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One filing. Created by `init`, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub name: String,
    pub locator: String,
}

/// A task ledger cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Checkpoint {
    Pending,
    Failed,
    /// A prerequisite failed; only an overwrite or retry runs it again.
    Blocked,
    Done(Value),
}

impl Checkpoint {
    pub fn is_done(&self) -> bool {
        matches!(self, Checkpoint::Done(_))
    }

    fn to_sql(&self) -> Option<String> {
        match self {
            Checkpoint::Pending => None,
            Checkpoint::Failed => Some(FAILED_SENTINEL.to_string()),
            Checkpoint::Blocked => Some(BLOCKED_SENTINEL.to_string()),
            Checkpoint::Done(value) => Some(value.to_string()),
        }
    }

    fn from_sql(cell: Option<String>) -> Self {
        match cell {
            None => Checkpoint::Pending,
            Some(s) if s == FAILED_SENTINEL => Checkpoint::Failed,
            Some(s) if s == BLOCKED_SENTINEL => Checkpoint::Blocked,
            Some(s) => Checkpoint::Done(serde_json::from_str(&s).unwrap_or(Value::String(s))),
        }
    }
}

/// What one stage of one item leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCommit {
    pub stage: String,
    pub checkpoint: Checkpoint,
    /// Serialized escalation record, if the stage produced one.
    pub record: Option<Value>,
    pub problem_ids: Vec<i64>,
}

/// Cell counts for one stage column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub done: i64,
    pub failed: i64,
    pub blocked: i64,
    pub pending: i64,
}

/// Stage names double as column names, so they are restricted to
/// lowercase identifiers.
pub fn is_valid_stage_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn column(stage: &str) -> Result<&str, FatalError> {
    if is_valid_stage_name(stage) {
        Ok(stage)
    } else {
        Err(FatalError::Config(format!("invalid stage name: {stage:?}")))
    }
}

/// True for errors caused by another writer holding the database.
pub fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

pub struct CheckpointStore {
    conn: Connection,
}

impl CheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FatalError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, FatalError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, FatalError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS work_items (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                locator TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_ledger (
                item_id INTEGER PRIMARY KEY REFERENCES work_items(id)
            );
            CREATE TABLE IF NOT EXISTS problem_vocabulary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS item_problems (
                item_id INTEGER NOT NULL,
                stage TEXT NOT NULL,
                problem_id INTEGER NOT NULL REFERENCES problem_vocabulary(id),
                PRIMARY KEY (item_id, stage, problem_id)
            );
            CREATE TABLE IF NOT EXISTS escalation_records (
                item_id INTEGER NOT NULL,
                stage TEXT NOT NULL,
                record TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (item_id, stage)
            );
            ",
        )?;
        Ok(Self { conn })
    }

    /// Add a ledger column for every stage that lacks one.
    pub fn ensure_stage_columns(&self, stages: &[&str]) -> Result<(), FatalError> {
        let existing = self.ledger_columns()?;
        for stage in stages {
            let col = column(stage)?;
            if !existing.iter().any(|c| c == col) {
                self.conn
                    .execute(&format!("ALTER TABLE task_ledger ADD COLUMN {col} TEXT"), [])?;
            }
        }
        Ok(())
    }

    fn ledger_columns(&self) -> Result<Vec<String>, FatalError> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(task_ledger)")?;
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cols)
    }

    /// Insert items not already present. Returns how many were new.
    pub fn insert_items(&mut self, items: &[WorkItem]) -> Result<usize, FatalError> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for item in items {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO work_items (id, name, locator) VALUES (?1, ?2, ?3)",
                params![item.id, item.name, item.locator],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO task_ledger (item_id) VALUES (?1)",
                params![item.id],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// All item ids, ascending.
    pub fn item_ids(&self) -> Result<Vec<i64>, FatalError> {
        let mut stmt = self.conn.prepare("SELECT id FROM work_items ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn item(&self, id: i64) -> Result<Option<WorkItem>, FatalError> {
        let item = self
            .conn
            .query_row(
                "SELECT id, name, locator FROM work_items WHERE id = ?1",
                params![id],
                |row| {
                    Ok(WorkItem {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        locator: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(item)
    }

    /// Ids whose `stage` column is still NULL, ascending.
    pub fn pending_ids(&self, stage: &str) -> Result<Vec<i64>, FatalError> {
        let col = column(stage)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT w.id FROM work_items w JOIN task_ledger t ON t.item_id = w.id
             WHERE t.{col} IS NULL ORDER BY w.id"
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn checkpoint(&self, item_id: i64, stage: &str) -> Result<Checkpoint, FatalError> {
        let col = column(stage)?;
        let cell: Option<Option<String>> = self
            .conn
            .query_row(
                &format!("SELECT {col} FROM task_ledger WHERE item_id = ?1"),
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(Checkpoint::from_sql(cell.flatten()))
    }

    /// Write one item's stage results, escalation records and problems in a
    /// single transaction, replacing what a previous attempt left for the
    /// same stages.
    pub fn commit_item(&mut self, item_id: i64, stages: &[StageCommit]) -> rusqlite::Result<()> {
        let tx = self.conn.transaction()?;
        for commit in stages {
            write_stage(&tx, item_id, commit)?;
        }
        tx.commit()
    }

    pub fn stage_counts(&self, stage: &str) -> Result<StageCounts, FatalError> {
        let col = column(stage)?;
        let counts = self.conn.query_row(
            &format!(
                "SELECT
                    COALESCE(SUM(CASE WHEN {col} IS NOT NULL AND {col} NOT IN (?1, ?2) THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN {col} = ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN {col} = ?2 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN {col} IS NULL THEN 1 ELSE 0 END), 0)
                 FROM task_ledger"
            ),
            params![FAILED_SENTINEL, BLOCKED_SENTINEL],
            |row| {
                Ok(StageCounts {
                    done: row.get(0)?,
                    failed: row.get(1)?,
                    blocked: row.get(2)?,
                    pending: row.get(3)?,
                })
            },
        )?;
        Ok(counts)
    }

    pub fn items_with_problems(&self) -> Result<i64, FatalError> {
        let n = self.conn.query_row(
            "SELECT COUNT(DISTINCT item_id) FROM item_problems",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Problem descriptions stored for an item, in vocabulary order.
    pub fn item_problems(&self, item_id: i64) -> Result<Vec<(String, String)>, FatalError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.stage, v.description FROM item_problems p
             JOIN problem_vocabulary v ON v.id = p.problem_id
             WHERE p.item_id = ?1 ORDER BY p.stage, v.id",
        )?;
        let rows = stmt
            .query_map(params![item_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, String)>, _>>()?;
        Ok(rows)
    }

    pub fn escalation_record(&self, item_id: i64, stage: &str) -> Result<Option<Value>, FatalError> {
        let text: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM escalation_records WHERE item_id = ?1 AND stage = ?2",
                params![item_id, stage],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

fn write_stage(tx: &Transaction<'_>, item_id: i64, commit: &StageCommit) -> rusqlite::Result<()> {
    // stage names are validated before any commit is built
    let col = &commit.stage;
    tx.execute(
        &format!("UPDATE task_ledger SET {col} = ?1 WHERE item_id = ?2"),
        params![commit.checkpoint.to_sql(), item_id],
    )?;

    tx.execute(
        "DELETE FROM escalation_records WHERE item_id = ?1 AND stage = ?2",
        params![item_id, commit.stage],
    )?;
    if let Some(record) = &commit.record {
        tx.execute(
            "INSERT INTO escalation_records (item_id, stage, record, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![item_id, commit.stage, record.to_string(), chrono::Utc::now().to_rfc3339()],
        )?;
    }

    tx.execute(
        "DELETE FROM item_problems WHERE item_id = ?1 AND stage = ?2",
        params![item_id, commit.stage],
    )?;
    for problem_id in &commit.problem_ids {
        tx.execute(
            "INSERT OR IGNORE INTO item_problems (item_id, stage, problem_id) VALUES (?1, ?2, ?3)",
            params![item_id, commit.stage, problem_id],
        )?;
    }
    Ok(())
}
