//! Queue persistence trait and its SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::{QueueEntry, QueueStatus};
use crate::db::Database;

/// Result of a pending → synced transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
  Updated,
  AlreadySynced,
  Missing,
}

/// Trait for offline queue backends.
///
/// Rows are never deleted; the only mutation after insert is the status
/// moving forward to synced.
pub trait QueueStore: Send + Sync {
  /// Insert a new pending entry and return its store-assigned id.
  fn insert_entry(&self, entry_type: &str, payload: &Value, created_at: DateTime<Utc>)
    -> Result<i64>;

  /// Get a single entry by id.
  fn get_entry(&self, id: i64) -> Result<Option<QueueEntry>>;

  /// Entries with the given status, in creation order.
  fn entries_with_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>>;

  /// Number of entries with the given status.
  fn count_with_status(&self, status: QueueStatus) -> Result<usize>;

  /// Move one entry from pending to synced.
  fn mark_entry_synced(&self, id: i64) -> Result<MarkOutcome>;
}

const ENTRY_COLUMNS: &str = "id, type, payload, status, created_at";

impl QueueStore for Database {
  fn insert_entry(
    &self,
    entry_type: &str,
    payload: &Value,
    created_at: DateTime<Utc>,
  ) -> Result<i64> {
    let conn = self.lock()?;
    let payload =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    // AUTOINCREMENT guarantees ids are never reused
    conn
      .execute(
        "INSERT INTO offline_queue (type, payload, status, created_at) VALUES (?, ?, ?, ?)",
        params![
          entry_type,
          payload,
          QueueStatus::Pending.as_str(),
          created_at.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue {} entry: {}", entry_type, e))?;

    Ok(conn.last_insert_rowid())
  }

  fn get_entry(&self, id: i64) -> Result<Option<QueueEntry>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        &format!("SELECT {} FROM offline_queue WHERE id = ?", ENTRY_COLUMNS),
        params![id],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query queue entry {}: {}", id, e))?;

    row.map(into_entry).transpose()
  }

  fn entries_with_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM offline_queue WHERE status = ? ORDER BY id",
        ENTRY_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<RawEntry> = stmt
      .query_map(params![status.as_str()], read_row)
      .map_err(|e| eyre!("Failed to list {} entries: {}", status.as_str(), e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read queue row: {}", e))?;

    rows.into_iter().map(into_entry).collect()
  }

  fn count_with_status(&self, status: QueueStatus) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM offline_queue WHERE status = ?",
        params![status.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count {} entries: {}", status.as_str(), e))?;

    Ok(count as usize)
  }

  fn mark_entry_synced(&self, id: i64) -> Result<MarkOutcome> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let status: Option<String> = tx
      .query_row(
        "SELECT status FROM offline_queue WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query queue entry {}: {}", id, e))?;

    let outcome = match status.as_deref().map(QueueStatus::parse) {
      None => MarkOutcome::Missing,
      Some(Some(QueueStatus::Synced)) => MarkOutcome::AlreadySynced,
      Some(Some(QueueStatus::Pending)) => {
        tx.execute(
          "UPDATE offline_queue SET status = ? WHERE id = ? AND status = ?",
          params![
            QueueStatus::Synced.as_str(),
            id,
            QueueStatus::Pending.as_str()
          ],
        )
        .map_err(|e| eyre!("Failed to mark entry {} synced: {}", id, e))?;
        MarkOutcome::Updated
      }
      Some(None) => return Err(eyre!("Queue entry {} has an unknown status", id)),
    };

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(outcome)
  }
}

type RawEntry = (i64, String, String, String, i64);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
  ))
}

fn into_entry((id, entry_type, payload, status, created_at): RawEntry) -> Result<QueueEntry> {
  let payload: Value = serde_json::from_str(&payload)
    .map_err(|e| eyre!("Failed to deserialize payload of entry {}: {}", id, e))?;
  let status = QueueStatus::parse(&status)
    .ok_or_else(|| eyre!("Queue entry {} has unknown status '{}'", id, status))?;
  let created_at = DateTime::<Utc>::from_timestamp_millis(created_at)
    .ok_or_else(|| eyre!("Queue entry {} has invalid timestamp {}", id, created_at))?;

  Ok(QueueEntry {
    id,
    entry_type,
    payload,
    status,
    created_at,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_insert_assigns_increasing_ids() {
    let db = Database::open_in_memory().unwrap();
    let a = db.insert_entry("movimiento", &json!({"monto": 1}), Utc::now()).unwrap();
    let b = db.insert_entry("movimiento", &json!({"monto": 2}), Utc::now()).unwrap();
    assert!(b > a);

    let entry = db.get_entry(a).unwrap().unwrap();
    assert_eq!(entry.entry_type, "movimiento");
    assert_eq!(entry.payload, json!({"monto": 1}));
    assert_eq!(entry.status, QueueStatus::Pending);
  }

  #[test]
  fn test_created_at_round_trips_millis() {
    let db = Database::open_in_memory().unwrap();
    let now = DateTime::<Utc>::from_timestamp_millis(1_759_000_000_123).unwrap();
    let id = db.insert_entry("suscripcion", &json!({}), now).unwrap();
    assert_eq!(db.get_entry(id).unwrap().unwrap().created_at, now);
  }

  #[test]
  fn test_mark_entry_synced_outcomes() {
    let db = Database::open_in_memory().unwrap();
    let id = db.insert_entry("movimiento", &json!({}), Utc::now()).unwrap();

    assert_eq!(db.mark_entry_synced(id).unwrap(), MarkOutcome::Updated);
    assert_eq!(db.mark_entry_synced(id).unwrap(), MarkOutcome::AlreadySynced);
    assert_eq!(db.mark_entry_synced(id + 100).unwrap(), MarkOutcome::Missing);

    assert_eq!(db.count_with_status(QueueStatus::Pending).unwrap(), 0);
    assert_eq!(db.count_with_status(QueueStatus::Synced).unwrap(), 1);
  }

  #[test]
  fn test_ids_not_reused() {
    let db = Database::open_in_memory().unwrap();
    let first = db.insert_entry("movimiento", &json!({}), Utc::now()).unwrap();
    db.lock()
      .unwrap()
      .execute("DELETE FROM offline_queue", [])
      .unwrap();
    let second = db.insert_entry("movimiento", &json!({}), Utc::now()).unwrap();
    assert!(second > first);
  }
}
