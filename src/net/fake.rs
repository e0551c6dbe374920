//! In-process network double for handler tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Network, Request, Response};

/// Routes by exact URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  hang: AtomicBool,
  delay: Mutex<Option<Duration>>,
  calls: Mutex<Vec<(String, String)>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Make every fetch pend forever.
  pub fn set_hang(&self, hang: bool) {
    self.hang.store(hang, Ordering::SeqCst);
  }

  /// Answer routed requests only after `delay`.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// (method, url) of every fetch attempted so far.
  pub fn calls(&self) -> Vec<(String, String)> {
    self.calls.lock().unwrap().clone()
  }
}

impl Network for FakeNetwork {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
    self
      .calls
      .lock()
      .unwrap()
      .push((request.method.to_string(), request.url.to_string()));

    if self.hang.load(Ordering::SeqCst) {
      return futures::future::pending().boxed();
    }
    if self.offline.load(Ordering::SeqCst) {
      let url = request.url.to_string();
      return async move { Err(eyre!("network unreachable: {}", url)) }.boxed();
    }

    let response = self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .unwrap_or_else(|| Response::new(404, "not found"));
    let delay = *self.delay.lock().unwrap();
    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      Ok(response)
    }
    .boxed()
  }
}
