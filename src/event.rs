use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::CacheStorage;
use crate::queue::QueueStore;
use crate::worker::{Effect, Worker, WorkerEvent};

/// An event waiting to be handled, with the channel its effects go back on
struct Dispatch {
  event: WorkerEvent,
  reply: oneshot::Sender<Result<Vec<Effect>>>,
}

/// Handle for posting events to a running worker
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Dispatch>,
}

impl WorkerHandle {
  /// Start the event loop for `worker`.
  ///
  /// Each event runs in its own task, so a slow fetch never holds up a
  /// flush or another fetch. The loop ends once every handle is dropped.
  pub fn spawn<S>(worker: Arc<Worker<S>>) -> (Self, JoinHandle<()>)
  where
    S: CacheStorage + QueueStore + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();

    let task = tokio::spawn(async move {
      while let Some(Dispatch { event, reply }) = rx.recv().await {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
          let result = worker.handle(event).await;
          // Ignore send errors - the caller may have stopped waiting
          let _ = reply.send(result);
        });
      }
      debug!("Worker event loop stopped");
    });

    (Self { tx }, task)
  }

  /// Post an event and wait for its effects.
  pub async fn send(&self, event: WorkerEvent) -> Result<Vec<Effect>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Dispatch { event, reply })
      .map_err(|_| eyre!("Worker event loop has stopped"))?;

    rx.await
      .map_err(|_| eyre!("Worker dropped the event without answering"))?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::db::Database;
  use crate::net::fake::FakeNetwork;
  use crate::net::{Method, Request, Response};
  use crate::sync::LocalRelay;
  use serde_json::json;
  use std::time::Duration;
  use url::Url;

  fn spawn_worker(network: Arc<FakeNetwork>) -> (WorkerHandle, Arc<Worker<Database>>) {
    let mut config = Config::for_origin(Url::parse("https://app.example").unwrap());
    config.cache.shell = vec!["./index.html".to_string()];
    let worker = Arc::new(
      Worker::new(
        &config,
        Arc::new(Database::open_in_memory().unwrap()),
        network,
        Arc::new(LocalRelay),
      )
      .unwrap(),
    );
    let (handle, _task) = WorkerHandle::spawn(Arc::clone(&worker));
    (handle, worker)
  }

  #[tokio::test]
  async fn test_send_returns_effects() {
    let network = Arc::new(FakeNetwork::new());
    network.route("https://app.example/index.html", Response::new(200, "<shell>"));
    let (handle, worker) = spawn_worker(network);

    handle.send(WorkerEvent::Install).await.unwrap();
    assert!(worker.lifecycle().is_controlling());

    let effects = handle
      .send(WorkerEvent::Message(json!({ "type": "FLUSH_QUEUE" })))
      .await
      .unwrap();
    assert_eq!(effects.len(), 1);
  }

  #[tokio::test]
  async fn test_hung_fetch_does_not_block_other_events() {
    let network = Arc::new(FakeNetwork::new());
    network.route("https://app.example/index.html", Response::new(200, "<shell>"));
    let (handle, worker) = spawn_worker(Arc::clone(&network));
    handle.send(WorkerEvent::Install).await.unwrap();

    network.set_hang(true);
    let fetching = handle.clone();
    let hung = tokio::spawn(async move {
      fetching
        .send(WorkerEvent::Fetch(
          Request::new(Method::POST, Url::parse("https://app.example/api").unwrap())
            .with_body("{}"),
        ))
        .await
    });
    tokio::task::yield_now().await;

    worker.queue().enqueue("movimiento", json!({})).unwrap();
    let effects = tokio::time::timeout(
      Duration::from_millis(200),
      handle.send(WorkerEvent::Connectivity { online: true }),
    )
    .await
    .expect("flush must not wait behind a hung fetch")
    .unwrap();
    assert_eq!(effects.len(), 1);
    assert_eq!(worker.queue().pending_count(), 0);
    assert!(!hung.is_finished());
    hung.abort();
  }

  #[tokio::test]
  async fn test_errors_travel_back_to_sender() {
    let network = Arc::new(FakeNetwork::new());
    network.set_offline(true);
    let (handle, _worker) = spawn_worker(network);

    assert!(handle.send(WorkerEvent::Install).await.is_err());
  }
}
