//! Versioned response cache scoped to one cache generation.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::traits::{CacheKey, CacheStorage};
use crate::net::{Network, Request, Response};

/// Cache manager for one generation (`<prefix><version>`).
///
/// Reads and writes always go to this manager's own generation; other
/// generations under the same prefix are only ever deleted.
pub struct CacheManager<S: CacheStorage> {
  storage: Arc<S>,
  prefix: String,
  name: String,
}

impl<S: CacheStorage> CacheManager<S> {
  pub fn new(storage: Arc<S>, prefix: &str, version: &str) -> Self {
    Self {
      storage,
      prefix: prefix.to_string(),
      name: format!("{}{}", prefix, version),
    }
  }

  /// Name of the generation this manager reads and writes.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Whether this manager's generation exists in storage.
  pub fn exists(&self) -> Result<bool> {
    Ok(self.storage.generation(&self.name)?.is_some())
  }

  /// Fetch and store the application shell as one set.
  ///
  /// Every URL must come back with a success status; otherwise nothing is
  /// stored and the error names the first offending URL.
  pub async fn precache(&self, network: &dyn Network, urls: &[Url]) -> Result<usize> {
    let fetches = urls.iter().map(|url| {
      let request = Request::get(url.clone());
      let fetch = network.fetch(request.clone());
      async move {
        let response = fetch
          .await
          .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
        if !response.is_success() {
          return Err(eyre!(
            "Failed to precache {}: status {}",
            request.url,
            response.status
          ));
        }
        Ok::<_, color_eyre::Report>((CacheKey::for_request(&request), response))
      }
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(&self.name, &entries)?;

    info!(cache = %self.name, count = entries.len(), "Precached application shell");
    Ok(entries.len())
  }

  /// Exact method + URL lookup in this generation.
  pub fn lookup(&self, request: &Request) -> Result<Option<Response>> {
    if !request.is_get() {
      return Ok(None);
    }
    let key = CacheKey::for_request(request);
    Ok(
      self
        .storage
        .get_response(&self.name, &key)?
        .map(|cached| cached.response),
    )
  }

  /// Store a freshly fetched response for a GET request.
  ///
  /// Returns false (and leaves any previous entry untouched) for non-GET
  /// requests, unsuccessful responses, and a generation that no longer
  /// exists.
  pub fn store(&self, request: &Request, response: &Response) -> Result<bool> {
    if !request.is_get() || !response.is_success() {
      debug!(url = %request.url, status = response.status, "Not caching response");
      return Ok(false);
    }
    let key = CacheKey::for_request(request);
    let stored = self.storage.put_response(&self.name, &key, response)?;
    if !stored {
      debug!(cache = %self.name, url = %request.url, "Cache generation gone, dropping response");
    }
    Ok(stored)
  }

  /// Delete every generation under this prefix except `active`.
  ///
  /// Returns the names that were removed; running it again is a no-op.
  pub fn purge_stale(&self, active: &str) -> Result<Vec<String>> {
    let mut purged = Vec::new();
    for generation in self.storage.generations()? {
      if is_stale_generation(&self.prefix, &generation.name, active)
        && self.storage.delete_cache(&generation.name)?
      {
        info!(cache = %generation.name, "Deleted stale cache generation");
        purged.push(generation.name);
      }
    }
    Ok(purged)
  }
}

/// Caches that merely share the prefix with the active one are garbage;
/// caches outside the prefix belong to someone else and are left alone.
pub fn is_stale_generation(prefix: &str, name: &str, active: &str) -> bool {
  name.starts_with(prefix) && name != active
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::net::fake::FakeNetwork;
  use crate::net::Method;

  const PREFIX: &str = "presupuesto-cache-";

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn manager(db: &Arc<Database>, version: &str) -> CacheManager<Database> {
    CacheManager::new(Arc::clone(db), PREFIX, version)
  }

  #[test]
  fn test_generation_name() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    assert_eq!(manager(&db, "v2").name(), "presupuesto-cache-v2");
  }

  #[test]
  fn test_is_stale_generation() {
    assert!(is_stale_generation(PREFIX, "presupuesto-cache-v1", "presupuesto-cache-v2"));
    assert!(!is_stale_generation(PREFIX, "presupuesto-cache-v2", "presupuesto-cache-v2"));
    assert!(!is_stale_generation(PREFIX, "workbox-runtime", "presupuesto-cache-v2"));
  }

  #[tokio::test]
  async fn test_precache_stores_whole_shell() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cache = manager(&db, "v1");
    let network = FakeNetwork::new();
    network.route("https://app.example/", Response::new(200, "root"));
    network.route("https://app.example/index.html", Response::new(200, "index"));

    let urls = vec![
      url("https://app.example/"),
      url("https://app.example/index.html"),
    ];
    assert_eq!(cache.precache(&network, &urls).await.unwrap(), 2);

    let hit = cache
      .lookup(&Request::get(url("https://app.example/index.html")))
      .unwrap()
      .unwrap();
    assert_eq!(hit.body, b"index");
  }

  #[tokio::test]
  async fn test_precache_failure_stores_nothing() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cache = manager(&db, "v1");
    let network = FakeNetwork::new();
    network.route("https://app.example/", Response::new(200, "root"));
    // index.html is not routed and answers 404

    let urls = vec![
      url("https://app.example/"),
      url("https://app.example/index.html"),
    ];
    let err = cache.precache(&network, &urls).await.unwrap_err();
    assert!(err.to_string().contains("index.html"));

    assert!(!cache.exists().unwrap());
    assert!(cache
      .lookup(&Request::get(url("https://app.example/")))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_precache_offline_fails() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cache = manager(&db, "v1");
    let network = FakeNetwork::new();
    network.set_offline(true);

    assert!(cache
      .precache(&network, &[url("https://app.example/")])
      .await
      .is_err());
    assert!(!cache.exists().unwrap());
  }

  #[test]
  fn test_store_only_successful_get() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cache = manager(&db, "v1");
    db.open_cache(cache.name()).unwrap();
    let get = Request::get(url("https://app.example/api/movimientos"));

    assert!(cache.store(&get, &Response::new(200, "good")).unwrap());
    assert!(!cache.store(&get, &Response::new(500, "boom")).unwrap());
    assert!(!cache.store(&get, &Response::network_error()).unwrap());

    // Previous good entry survives the failed refreshes
    assert_eq!(cache.lookup(&get).unwrap().unwrap().body, b"good");

    let post = Request::new(Method::POST, url("https://app.example/api/movimientos"));
    assert!(!cache.store(&post, &Response::new(200, "x")).unwrap());
    assert!(cache.lookup(&post).unwrap().is_none());
  }

  #[test]
  fn test_store_into_purged_generation_is_dropped() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let v1 = manager(&db, "v1");
    let v2 = manager(&db, "v2");
    db.open_cache(v1.name()).unwrap();
    db.open_cache(v2.name()).unwrap();
    v2.purge_stale(v2.name()).unwrap();

    let get = Request::get(url("https://app.example/api/panel"));
    assert!(!v1.store(&get, &Response::new(200, "late")).unwrap());
    assert!(!v1.exists().unwrap());
  }

  #[test]
  fn test_purge_stale_keeps_active_and_foreign_caches() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.open_cache("presupuesto-cache-v1").unwrap();
    db.open_cache("presupuesto-cache-v2").unwrap();
    db.open_cache("other-app-cache").unwrap();

    let cache = manager(&db, "v2");
    let purged = cache.purge_stale(cache.name()).unwrap();
    assert_eq!(purged, vec!["presupuesto-cache-v1"]);

    let names: Vec<String> = db.generations().unwrap().into_iter().map(|g| g.name).collect();
    assert!(names.contains(&"presupuesto-cache-v2".to_string()));
    assert!(names.contains(&"other-app-cache".to_string()));
    assert!(!names.contains(&"presupuesto-cache-v1".to_string()));

    // Idempotent
    assert!(cache.purge_stale(cache.name()).unwrap().is_empty());
  }
}
