//! Durable queue of mutations that could not reach the network.
//!
//! Entries are an append-only audit log: each one is created pending and can
//! only move forward to synced. The number of pending entries is published on
//! a watch channel so the interface can show "N movements waiting to sync".

mod storage;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use storage::{MarkOutcome, QueueStore};

/// Delivery status of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
  Pending,
  Synced,
}

impl QueueStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueueStatus::Pending => "pending",
      QueueStatus::Synced => "synced",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(QueueStatus::Pending),
      "synced" => Some(QueueStatus::Synced),
      _ => None,
    }
  }
}

/// A mutation waiting to be relayed (or already relayed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
  pub id: i64,
  /// Domain kind of the payload (e.g. "movimiento")
  #[serde(rename = "type")]
  pub entry_type: String,
  /// Parsed body of the original request
  pub payload: Value,
  pub status: QueueStatus,
  pub created_at: DateTime<Utc>,
}

/// The offline write queue.
pub struct OfflineQueue<Q: QueueStore> {
  store: Arc<Q>,
  pending: watch::Sender<usize>,
}

impl<Q: QueueStore> OfflineQueue<Q> {
  /// Wrap a store and load the initial pending count.
  pub fn new(store: Arc<Q>) -> Result<Self> {
    let count = store.count_with_status(QueueStatus::Pending)?;
    let (pending, _) = watch::channel(count);
    Ok(Self { store, pending })
  }

  /// Persist a new pending entry. Every call creates exactly one entry.
  pub fn enqueue(&self, entry_type: &str, payload: Value) -> Result<i64> {
    let id = self.store.insert_entry(entry_type, &payload, Utc::now())?;
    info!(id, entry_type, "Queued offline mutation");
    self.refresh_count();
    Ok(id)
  }

  /// Pending entries in creation order.
  pub fn list_pending(&self) -> Result<Vec<QueueEntry>> {
    self.store.entries_with_status(QueueStatus::Pending)
  }

  /// Every entry (pending and synced) in creation order.
  pub fn list_all(&self) -> Result<Vec<QueueEntry>> {
    let mut entries = self.store.entries_with_status(QueueStatus::Pending)?;
    entries.extend(self.store.entries_with_status(QueueStatus::Synced)?);
    entries.sort_by_key(|e| e.id);
    Ok(entries)
  }

  pub fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
    self.store.get_entry(id)
  }

  /// Mark one entry as delivered.
  ///
  /// An unknown id is logged and otherwise ignored; an already synced entry
  /// is left as is.
  pub fn mark_synced(&self, id: i64) -> Result<()> {
    match self.store.mark_entry_synced(id)? {
      MarkOutcome::Updated => {
        debug!(id, "Queue entry synced");
        self.refresh_count();
      }
      MarkOutcome::AlreadySynced => debug!(id, "Queue entry already synced"),
      MarkOutcome::Missing => warn!(id, "Cannot mark unknown queue entry as synced"),
    }
    Ok(())
  }

  /// Current number of pending entries.
  pub fn pending_count(&self) -> usize {
    *self.pending.borrow()
  }

  /// Observe the pending count; updated on every enqueue and status change.
  pub fn subscribe(&self) -> watch::Receiver<usize> {
    self.pending.subscribe()
  }

  fn refresh_count(&self) {
    match self.store.count_with_status(QueueStatus::Pending) {
      Ok(count) => {
        self.pending.send_replace(count);
      }
      Err(e) => warn!("Failed to refresh pending count: {}", e),
    }
  }
}
