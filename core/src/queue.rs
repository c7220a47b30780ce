//! The change queue: an append-only ledger of local mutations awaiting push.
//!
//! Records are never deleted. Several records may point at the same entity;
//! each one is pushed on its own, in insertion order.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::db::{Database, format_ts, opt_ts_column};
use crate::models::{ChangeRecord, ChangeStatus, EntityKind, Operation};

const CHANGE_COLUMNS: &str = "id, entity_kind, entity_id, operation, status, last_attempt_at";

fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

impl Database {
    fn change_from_row(row: &rusqlite::Row) -> rusqlite::Result<ChangeRecord> {
        Ok(ChangeRecord {
            id: row.get(0)?,
            entity_kind: parse_column(row, 1)?,
            entity_id: row.get(2)?,
            operation: parse_column(row, 3)?,
            status: parse_column(row, 4)?,
            last_attempt_at: opt_ts_column(row, 5)?,
        })
    }

    pub fn enqueue_change(
        &self,
        kind: EntityKind,
        entity_id: &str,
        operation: Operation,
    ) -> Result<ChangeRecord> {
        self.conn
            .execute(
                "INSERT INTO change_queue (entity_kind, entity_id, operation, status)
                 VALUES (?1, ?2, ?3, 'pending')",
                params![kind.as_str(), entity_id, operation.as_str()],
            )
            .with_context(|| format!("Failed to enqueue {operation} for {kind} {entity_id}"))?;
        Ok(ChangeRecord {
            id: self.conn.last_insert_rowid(),
            entity_kind: kind,
            entity_id: entity_id.to_string(),
            operation,
            status: ChangeStatus::Pending,
            last_attempt_at: None,
        })
    }

    /// Pending records in insertion order.
    pub fn list_pending_changes(&self) -> Result<Vec<ChangeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHANGE_COLUMNS} FROM change_queue WHERE status = 'pending' ORDER BY id"
        ))?;
        let records = stmt
            .query_map([], Self::change_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Most recent records first, optionally filtered by status.
    pub fn list_changes(&self, status: Option<ChangeStatus>, limit: usize) -> Result<Vec<ChangeRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {CHANGE_COLUMNS} FROM change_queue
                     WHERE status = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                stmt.query_map(params![status.as_str(), limit], Self::change_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {CHANGE_COLUMNS} FROM change_queue ORDER BY id DESC LIMIT ?1"
                ))?;
                stmt.query_map(params![limit], Self::change_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    pub fn get_change(&self, id: i64) -> Result<Option<ChangeRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {CHANGE_COLUMNS} FROM change_queue WHERE id = ?1"),
                params![id],
                Self::change_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn set_change_status(
        &self,
        id: i64,
        status: ChangeStatus,
        at: &DateTime<Utc>,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE change_queue SET status = ?1, last_attempt_at = ?2 WHERE id = ?3",
            params![status.as_str(), format_ts(at), id],
        )?;
        Ok(rows > 0)
    }

    pub fn mark_change_synced(&self, id: i64, at: &DateTime<Utc>) -> Result<bool> {
        self.set_change_status(id, ChangeStatus::Synced, at)
    }

    pub fn mark_change_failed(&self, id: i64, at: &DateTime<Utc>) -> Result<bool> {
        self.set_change_status(id, ChangeStatus::Failed, at)
    }

    pub fn mark_change_skipped(&self, id: i64, at: &DateTime<Utc>) -> Result<bool> {
        self.set_change_status(id, ChangeStatus::Skipped, at)
    }

    /// Move every failed record back to pending. Returns how many moved.
    pub fn requeue_failed_changes(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE change_queue SET status = 'pending' WHERE status = 'failed'",
            [],
        )?;
        Ok(rows)
    }
}
