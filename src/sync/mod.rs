//! Draining of the offline queue.

mod relay;

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use relay::{HttpRelay, LocalRelay, Relay};

use crate::queue::{OfflineQueue, QueueStore};

/// What asked for the flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
  /// Explicit `FLUSH_QUEUE` command from the application
  Command,
  /// The application regained network connectivity
  Online,
  /// The application became visible again
  Visible,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
  /// Entries relayed and marked synced
  pub relayed: Vec<i64>,
  /// Entries that stay pending until the next trigger
  pub failed: Vec<i64>,
}

impl FlushReport {
  pub fn is_empty(&self) -> bool {
    self.relayed.is_empty() && self.failed.is_empty()
  }
}

/// Walks pending entries and relays each one independently.
pub struct FlushCoordinator<Q: QueueStore> {
  queue: Arc<OfflineQueue<Q>>,
  relay: Arc<dyn Relay>,
  /// Serializes flushes so an entry is never relayed twice concurrently
  running: Mutex<()>,
}

impl<Q: QueueStore> FlushCoordinator<Q> {
  pub fn new(queue: Arc<OfflineQueue<Q>>, relay: Arc<dyn Relay>) -> Self {
    Self {
      queue,
      relay,
      running: Mutex::new(()),
    }
  }

  /// Relay every pending entry in creation order.
  ///
  /// A failed entry is logged and left pending; it does not stop the others.
  /// Errors are returned only when the pending list itself cannot be read.
  pub async fn flush(&self, trigger: FlushTrigger) -> Result<FlushReport> {
    let _running = self.running.lock().await;
    let pending = self.queue.list_pending()?;
    let mut report = FlushReport::default();

    for entry in &pending {
      if let Err(e) = self.relay.relay(entry).await {
        warn!(id = entry.id, "Failed to relay queue entry: {}", e);
        report.failed.push(entry.id);
        continue;
      }
      match self.queue.mark_synced(entry.id) {
        Ok(()) => report.relayed.push(entry.id),
        Err(e) => {
          warn!(id = entry.id, "Failed to mark queue entry synced: {}", e);
          report.failed.push(entry.id);
        }
      }
    }

    if !report.is_empty() {
      info!(
        ?trigger,
        relayed = report.relayed.len(),
        failed = report.failed.len(),
        "Flushed offline queue"
      );
    }
    Ok(report)
  }
}
