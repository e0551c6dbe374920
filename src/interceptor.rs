//! Per-request policy: serve from cache, go to the network, or queue.
//!
//! 1. Out-of-scope requests go straight to the network, untouched.
//! 2. Mutations try the network; on a connectivity failure the parsed body is
//!    queued and a synthetic 202 `{"queued":true}` is returned.
//! 3. In-scope GETs are stale-while-revalidate: a cached response is returned
//!    at once while a background fetch refreshes the entry for next time.
//!    Without a cached copy the network answer is cached and returned; if the
//!    network fails, navigations get the cached shell and everything else a
//!    network-error response.
//!
//! Background refreshes are tracked so a short-lived process can wait for them
//! with [`Interceptor::settle`] before shutting its runtime down.

use color_eyre::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use url::Url;

use crate::cache::{CacheManager, CacheStorage};
use crate::net::{Network, Request, Response, Scope};
use crate::queue::{OfflineQueue, QueueStore};

/// How a request will be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  Passthrough,
  Read,
  Write,
}

pub struct Interceptor<S, Q>
where
  S: CacheStorage + 'static,
  Q: QueueStore,
{
  scope: Scope,
  cache: Arc<CacheManager<S>>,
  queue: Arc<OfflineQueue<Q>>,
  network: Arc<dyn Network>,
  /// Type tag for payloads that do not carry their own `type`
  default_type: String,
  /// Shell document served to navigations when the network is down
  shell_index: Url,
  /// In-flight background refreshes
  refreshes: Mutex<JoinSet<()>>,
}

impl<S, Q> Interceptor<S, Q>
where
  S: CacheStorage + 'static,
  Q: QueueStore,
{
  pub fn new(
    scope: Scope,
    cache: Arc<CacheManager<S>>,
    queue: Arc<OfflineQueue<Q>>,
    network: Arc<dyn Network>,
    default_type: &str,
    shell_index: Url,
  ) -> Self {
    Self {
      scope,
      cache,
      queue,
      network,
      default_type: default_type.to_string(),
      shell_index,
      refreshes: Mutex::new(JoinSet::new()),
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if !self.scope.contains(&request.url) {
      RequestClass::Passthrough
    } else if request.is_get() {
      RequestClass::Read
    } else {
      RequestClass::Write
    }
  }

  /// Handle one request.
  ///
  /// Only passthrough requests can fail; in-scope failures are always turned
  /// into a cached, queued, or network-error response.
  pub async fn handle(&self, request: Request) -> Result<Response> {
    match self.classify(&request) {
      RequestClass::Passthrough => {
        debug!(method = %request.method, url = %request.url, "Out of scope, passing through");
        self.network.fetch(request).await
      }
      RequestClass::Read => Ok(self.handle_read(request).await),
      RequestClass::Write => Ok(self.handle_write(request).await),
    }
  }

  async fn handle_read(&self, request: Request) -> Response {
    let cached = self.cache.lookup(&request).unwrap_or_else(|e| {
      warn!(url = %request.url, "Cache lookup failed: {}", e);
      None
    });

    if let Some(cached) = cached {
      debug!(url = %request.url, "Serving from cache, revalidating in background");
      self.revalidate(request);
      return cached;
    }

    match self.network.fetch(request.clone()).await {
      Ok(response) => {
        populate(&self.cache, &request, &response);
        response
      }
      Err(e) => {
        debug!(url = %request.url, "Network failed with no cached copy: {}", e);
        self.offline_fallback(&request)
      }
    }
  }

  /// Refresh the cache entry for `request` without blocking the caller.
  ///
  /// The refreshed response is never returned to anyone; the last writer
  /// wins if several refreshes race.
  pub fn revalidate(&self, request: Request) {
    let cache = Arc::clone(&self.cache);
    let fetch = self.network.fetch(request.clone());

    let mut refreshes = self.refreshes.lock().unwrap_or_else(PoisonError::into_inner);
    // Reap finished refreshes
    while refreshes.try_join_next().is_some() {}
    refreshes.spawn(async move {
      match fetch.await {
        Ok(response) => populate(&cache, &request, &response),
        Err(e) => debug!(url = %request.url, "Background revalidation failed: {}", e),
      }
    });
  }

  /// Wait for every background refresh started so far.
  pub async fn settle(&self) {
    let mut pending = std::mem::take(
      &mut *self.refreshes.lock().unwrap_or_else(PoisonError::into_inner),
    );
    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!("Background revalidation task failed: {}", e);
      }
    }
  }

  fn offline_fallback(&self, request: &Request) -> Response {
    if request.is_navigation() {
      let shell = Request::get(self.shell_index.clone());
      match self.cache.lookup(&shell) {
        Ok(Some(response)) => return response,
        Ok(None) => warn!(url = %self.shell_index, "Shell document missing from cache"),
        Err(e) => warn!(url = %self.shell_index, "Shell lookup failed: {}", e),
      }
    }
    Response::network_error()
  }

  async fn handle_write(&self, request: Request) -> Response {
    let payload = request.json_body();

    match self.network.fetch(request.clone()).await {
      Ok(response) => response,
      Err(e) => {
        warn!(method = %request.method, url = %request.url, "Mutation failed offline: {}", e);
        match payload {
          Some(payload) => self.enqueue(payload),
          None => warn!(url = %request.url, "Dropping mutation with unparseable body"),
        }
        Response::queued()
      }
    }
  }

  fn enqueue(&self, payload: Value) {
    let entry_type = payload
      .get("type")
      .and_then(Value::as_str)
      .unwrap_or(self.default_type.as_str())
      .to_string();

    if let Err(e) = self.queue.enqueue(&entry_type, payload) {
      error!("Failed to queue offline mutation: {}", e);
    }
  }
}

/// Best-effort cache write; a failure never affects the response.
fn populate<S: CacheStorage>(cache: &CacheManager<S>, request: &Request, response: &Response) {
  if let Err(e) = cache.store(request, response) {
    warn!(url = %request.url, "Failed to cache response: {}", e);
  }
}
