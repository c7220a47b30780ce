use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{Goal, ProgressEntry};

pub struct Database {
    pub(crate) conn: Connection,
}

const GOAL_COLUMNS: &str =
    "id, owner_id, title, description, start_date, end_date, target, created_at, updated_at, deleted";

const PROGRESS_COLUMNS: &str =
    "id, goal_id, date, value, note, created_at, updated_at, deleted";

// --- Column encoding ---
//
// Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
// text comparison (`updated_at > ?`) orders them chronologically.

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn ts_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_column(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn date_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS goals (
                    id TEXT PRIMARY KEY NOT NULL,
                    owner_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    target REAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS progress_entries (
                    id TEXT PRIMARY KEY NOT NULL,
                    goal_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    value REAL NOT NULL,
                    note TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS change_queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    entity_kind TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    last_attempt_at TEXT
                );

                CREATE TABLE IF NOT EXISTS sync_checkpoints (
                    owner_id TEXT PRIMARY KEY NOT NULL,
                    last_synced_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_goals_owner ON goals(owner_id);
                CREATE INDEX IF NOT EXISTS idx_goals_updated_at ON goals(updated_at);
                CREATE INDEX IF NOT EXISTS idx_progress_goal_date ON progress_entries(goal_id, date);
                CREATE INDEX IF NOT EXISTS idx_progress_updated_at ON progress_entries(updated_at);
                CREATE INDEX IF NOT EXISTS idx_change_queue_status ON change_queue(status);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn goal_from_row(row: &rusqlite::Row) -> rusqlite::Result<Goal> {
        Ok(Goal {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            start_date: date_column(row, 4)?,
            end_date: date_column(row, 5)?,
            target: row.get(6)?,
            created_at: ts_column(row, 7)?,
            updated_at: ts_column(row, 8)?,
            deleted: row.get(9)?,
        })
    }

    fn progress_from_row(row: &rusqlite::Row) -> rusqlite::Result<ProgressEntry> {
        Ok(ProgressEntry {
            id: row.get(0)?,
            goal_id: row.get(1)?,
            date: date_column(row, 2)?,
            value: row.get(3)?,
            note: row.get(4)?,
            created_at: ts_column(row, 5)?,
            updated_at: ts_column(row, 6)?,
            deleted: row.get(7)?,
        })
    }

    // --- Goals ---

    pub fn insert_goal(&self, goal: &Goal) -> Result<()> {
        self.conn
            .execute(
                &format!("INSERT INTO goals ({GOAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    goal.id,
                    goal.owner_id,
                    goal.title,
                    goal.description,
                    format_date(goal.start_date),
                    format_date(goal.end_date),
                    goal.target,
                    format_ts(&goal.created_at),
                    format_ts(&goal.updated_at),
                    goal.deleted,
                ],
            )
            .with_context(|| format!("Failed to insert goal {}", goal.id))?;
        Ok(())
    }

    pub fn get_goal(&self, id: &str) -> Result<Option<Goal>> {
        let goal = self
            .conn
            .query_row(
                &format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?1"),
                params![id],
                Self::goal_from_row,
            )
            .optional()?;
        Ok(goal)
    }

    /// Overwrite every mutable column of the goal with the given id.
    /// Returns false when no such goal exists.
    pub fn update_goal(&self, goal: &Goal) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE goals SET title = ?1, description = ?2, start_date = ?3, end_date = ?4,
             target = ?5, updated_at = ?6, deleted = ?7 WHERE id = ?8",
            params![
                goal.title,
                goal.description,
                format_date(goal.start_date),
                format_date(goal.end_date),
                goal.target,
                format_ts(&goal.updated_at),
                goal.deleted,
                goal.id,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn upsert_goal(&self, goal: &Goal) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO goals ({GOAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    title = excluded.title,
                    description = excluded.description,
                    start_date = excluded.start_date,
                    end_date = excluded.end_date,
                    target = excluded.target,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    deleted = excluded.deleted"
            ),
            params![
                goal.id,
                goal.owner_id,
                goal.title,
                goal.description,
                format_date(goal.start_date),
                format_date(goal.end_date),
                goal.target,
                format_ts(&goal.created_at),
                format_ts(&goal.updated_at),
                goal.deleted,
            ],
        )?;
        Ok(())
    }

    /// Non-deleted goals for an owner, newest first.
    pub fn list_goals(&self, owner_id: &str) -> Result<Vec<Goal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals
             WHERE owner_id = ?1 AND deleted = 0
             ORDER BY created_at DESC, id"
        ))?;
        let goals = stmt
            .query_map(params![owner_id], Self::goal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(goals)
    }

    pub fn soft_delete_goal(&self, id: &str, at: &DateTime<Utc>) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE goals SET deleted = 1, updated_at = max(updated_at, ?1) WHERE id = ?2",
            params![format_ts(at), id],
        )?;
        Ok(rows > 0)
    }

    pub fn goals_updated_since(&self, owner_id: &str, since: &DateTime<Utc>) -> Result<Vec<Goal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals
             WHERE owner_id = ?1 AND updated_at > ?2
             ORDER BY updated_at, id"
        ))?;
        let goals = stmt
            .query_map(params![owner_id, format_ts(since)], Self::goal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(goals)
    }

    // --- Progress entries ---

    pub fn insert_progress(&self, entry: &ProgressEntry) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO progress_entries ({PROGRESS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    entry.id,
                    entry.goal_id,
                    format_date(entry.date),
                    entry.value,
                    entry.note,
                    format_ts(&entry.created_at),
                    format_ts(&entry.updated_at),
                    entry.deleted,
                ],
            )
            .with_context(|| format!("Failed to insert progress entry {}", entry.id))?;
        Ok(())
    }

    pub fn get_progress(&self, id: &str) -> Result<Option<ProgressEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {PROGRESS_COLUMNS} FROM progress_entries WHERE id = ?1"),
                params![id],
                Self::progress_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// The entry logged for a goal on a date, deleted or not.
    pub fn get_progress_for_date(
        &self,
        goal_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ProgressEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM progress_entries
                     WHERE goal_id = ?1 AND date = ?2
                     ORDER BY updated_at DESC LIMIT 1"
                ),
                params![goal_id, format_date(date)],
                Self::progress_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn update_progress(&self, entry: &ProgressEntry) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE progress_entries SET value = ?1, note = ?2, updated_at = ?3, deleted = ?4
             WHERE id = ?5",
            params![
                entry.value,
                entry.note,
                format_ts(&entry.updated_at),
                entry.deleted,
                entry.id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Replace the row stored under `local_id` with `entry`, adopting its id.
    pub fn overwrite_progress(&self, local_id: &str, entry: &ProgressEntry) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE progress_entries SET id = ?1, goal_id = ?2, date = ?3, value = ?4, note = ?5,
             created_at = ?6, updated_at = ?7, deleted = ?8 WHERE id = ?9",
            params![
                entry.id,
                entry.goal_id,
                format_date(entry.date),
                entry.value,
                entry.note,
                format_ts(&entry.created_at),
                format_ts(&entry.updated_at),
                entry.deleted,
                local_id,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn upsert_progress(&self, entry: &ProgressEntry) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO progress_entries ({PROGRESS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    goal_id = excluded.goal_id,
                    date = excluded.date,
                    value = excluded.value,
                    note = excluded.note,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    deleted = excluded.deleted"
            ),
            params![
                entry.id,
                entry.goal_id,
                format_date(entry.date),
                entry.value,
                entry.note,
                format_ts(&entry.created_at),
                format_ts(&entry.updated_at),
                entry.deleted,
            ],
        )?;
        Ok(())
    }

    /// Non-deleted entries for a goal, most recent date first.
    pub fn list_progress_for_goal(&self, goal_id: &str) -> Result<Vec<ProgressEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress_entries
             WHERE goal_id = ?1 AND deleted = 0
             ORDER BY date DESC, id"
        ))?;
        let entries = stmt
            .query_map(params![goal_id], Self::progress_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn soft_delete_progress(&self, id: &str, at: &DateTime<Utc>) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE progress_entries SET deleted = 1, updated_at = max(updated_at, ?1) WHERE id = ?2",
            params![format_ts(at), id],
        )?;
        Ok(rows > 0)
    }

    pub fn progress_updated_since(
        &self,
        owner_id: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<ProgressEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.goal_id, p.date, p.value, p.note, p.created_at, p.updated_at, p.deleted
             FROM progress_entries p
             JOIN goals g ON p.goal_id = g.id
             WHERE g.owner_id = ?1 AND p.updated_at > ?2
             ORDER BY p.updated_at, p.id",
        )?;
        let entries = stmt
            .query_map(params![owner_id, format_ts(since)], Self::progress_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Non-deleted entries logged on `date` across an owner's live goals.
    pub fn count_progress_on(&self, owner_id: &str, date: NaiveDate) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM progress_entries p
             JOIN goals g ON p.goal_id = g.id
             WHERE g.owner_id = ?1 AND g.deleted = 0 AND p.deleted = 0 AND p.date = ?2",
            params![owner_id, format_date(date)],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // --- Sync checkpoints ---

    pub fn get_checkpoint(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>> {
        let checkpoint = self
            .conn
            .query_row(
                "SELECT last_synced_at FROM sync_checkpoints WHERE owner_id = ?1",
                params![owner_id],
                |row| ts_column(row, 0),
            )
            .optional()?;
        Ok(checkpoint)
    }

    pub fn set_checkpoint(&self, owner_id: &str, at: &DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_checkpoints (owner_id, last_synced_at) VALUES (?1, ?2)
             ON CONFLICT(owner_id) DO UPDATE SET last_synced_at = excluded.last_synced_at",
            params![owner_id, format_ts(at)],
        )?;
        Ok(())
    }

    // --- Config ---

    pub fn get_or_create_owner_id(&self) -> Result<String> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key = 'owner_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner_id) = existing {
            return Ok(owner_id);
        }

        let owner_id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO config (key, value) VALUES ('owner_id', ?1)",
            params![owner_id],
        )?;
        Ok(owner_id)
    }
}
