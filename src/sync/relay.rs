//! Delivery of queued mutations to a remote system.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use url::Url;

use crate::queue::QueueEntry;

/// The single integration point for sending a queued mutation onward.
///
/// An `Err` leaves the entry pending so the next flush retries it.
pub trait Relay: Send + Sync {
  fn relay<'a>(&'a self, entry: &'a QueueEntry) -> BoxFuture<'a, Result<()>>;
}

/// Relay used when no sync endpoint is configured.
///
/// There is no remote to talk to, so every entry counts as delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRelay;

impl Relay for LocalRelay {
  fn relay<'a>(&'a self, _entry: &'a QueueEntry) -> BoxFuture<'a, Result<()>> {
    async { Ok(()) }.boxed()
  }
}

/// Relay that POSTs each payload as JSON to a sync endpoint.
#[derive(Clone)]
pub struct HttpRelay {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpRelay {
  pub fn new(endpoint: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("presupuesto-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, endpoint })
  }

  async fn send(&self, entry: &QueueEntry) -> Result<()> {
    let body = serde_json::to_vec(&entry.payload)
      .map_err(|e| eyre!("Failed to serialize entry {}: {}", entry.id, e))?;

    let response = self
      .client
      .post(self.endpoint.clone())
      .header("Content-Type", "application/json")
      .header("X-Queue-Entry", entry.id.to_string())
      .header("X-Queue-Type", entry.entry_type.as_str())
      .body(body)
      .send()
      .await
      .map_err(|e| eyre!("Failed to relay entry {}: {}", entry.id, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Sync endpoint rejected entry {}: {}",
        entry.id,
        response.status()
      ));
    }
    Ok(())
  }
}

impl Relay for HttpRelay {
  fn relay<'a>(&'a self, entry: &'a QueueEntry) -> BoxFuture<'a, Result<()>> {
    self.send(entry).boxed()
  }
}
