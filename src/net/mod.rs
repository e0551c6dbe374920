//! Request/response types and the network seam.
//!
//! Everything the worker intercepts is modelled with the plain [`Request`] and
//! [`Response`] types below. The actual transport sits behind the [`Network`]
//! trait so handlers can be exercised against fakes.

mod client;
#[cfg(test)]
pub mod fake;

use color_eyre::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub use client::ReqwestNetwork;
pub use reqwest::Method;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Anything else (XHR, assets, API calls)
  #[default]
  Other,
}

/// An outgoing request issued by the application.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
      mode: RequestMode::Other,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A page navigation (GET with navigate mode).
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Parse the body as JSON.
  ///
  /// Returns None for a missing body, invalid JSON, or a JSON `null`, none of
  /// which can be replayed later.
  pub fn json_body(&self) -> Option<Value> {
    let body = self.body.as_deref()?;
    match serde_json::from_slice::<Value>(body) {
      Ok(Value::Null) | Err(_) => None,
      Ok(value) => Some(value),
    }
  }
}

/// A response, either from the network, the cache, or synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn json(status: u16, value: &Value) -> Self {
    Self::new(status, value.to_string()).with_header("Content-Type", "application/json")
  }

  /// The "accepted but not yet delivered" answer for mutations made offline.
  pub fn queued() -> Self {
    Self::json(202, &serde_json::json!({ "queued": true }))
  }

  /// Generic network error (status 0, empty body).
  pub fn network_error() -> Self {
    Self::new(0, Vec::new())
  }

  /// 2xx responses are the only ones worth caching.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_network_error(&self) -> bool {
    self.status == 0
  }

  /// Case-insensitive header lookup.
  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// The origin and base path the worker is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
  root: Url,
}

impl Scope {
  /// Build a scope from its root URL (origin plus base path).
  ///
  /// The base path always ends with `/` so that `/app` does not match
  /// `/application`.
  pub fn new(mut root: Url) -> Self {
    if !root.path().ends_with('/') {
      let path = format!("{}/", root.path());
      root.set_path(&path);
    }
    root.set_query(None);
    root.set_fragment(None);
    Self { root }
  }

  /// Whether a URL is same-origin and under the base path.
  pub fn contains(&self, url: &Url) -> bool {
    url.origin() == self.root.origin() && url.path().starts_with(self.root.path())
  }

  /// Resolve a path relative to the scope root (e.g. `./index.html`).
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .root
      .join(path)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid scoped path '{}': {}", path, e))
  }
}

/// Transport used by the worker to reach the network.
///
/// Any `Err` is treated as a connectivity failure (offline, DNS, refused).
/// HTTP error statuses are successful fetches carrying an error status.
pub trait Network: Send + Sync {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_scope_contains_same_origin_under_base_path() {
    let scope = Scope::new(url("https://app.example/presupuesto"));
    assert_eq!(scope, Scope::new(url("https://app.example/presupuesto/")));
    assert!(scope.contains(&url("https://app.example/presupuesto/")));
    assert!(scope.contains(&url("https://app.example/presupuesto/index.html?x=1")));
    assert!(!scope.contains(&url("https://app.example/presupuestos/index.html")));
    assert!(!scope.contains(&url("https://app.example/other")));
  }

  #[test]
  fn test_scope_rejects_other_origins() {
    let scope = Scope::new(url("https://app.example/"));
    assert!(!scope.contains(&url("https://other-origin.example/api")));
    assert!(!scope.contains(&url("http://app.example/")));
    assert!(!scope.contains(&url("https://app.example:8443/")));
  }

  #[test]
  fn test_scope_resolve() {
    let scope = Scope::new(url("https://app.example/presupuesto/"));
    assert_eq!(
      scope.resolve("./index.html").unwrap().as_str(),
      "https://app.example/presupuesto/index.html"
    );
    assert_eq!(
      scope.resolve("./").unwrap().as_str(),
      "https://app.example/presupuesto/"
    );
  }

  #[test]
  fn test_json_body() {
    let req = Request::new(Method::POST, url("https://app.example/api"));
    assert!(req.json_body().is_none());

    let req = req.with_body(r#"{"monto": 4500}"#);
    assert_eq!(req.json_body().unwrap()["monto"], 4500);

    let garbage = Request::new(Method::POST, url("https://app.example/api")).with_body("not json");
    assert!(garbage.json_body().is_none());

    let null = Request::new(Method::POST, url("https://app.example/api")).with_body("null");
    assert!(null.json_body().is_none());
  }

  #[test]
  fn test_queued_response() {
    let resp = Response::queued();
    assert_eq!(resp.status, 202);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    let body: Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body, serde_json::json!({ "queued": true }));
  }

  #[test]
  fn test_success_statuses() {
    assert!(Response::new(200, "").is_success());
    assert!(Response::new(204, "").is_success());
    assert!(!Response::new(304, "").is_success());
    assert!(!Response::new(500, "").is_success());
    assert!(!Response::network_error().is_success());
    assert!(Response::network_error().is_network_error());
  }
}
