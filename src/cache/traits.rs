//! Core traits and types for the response cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::net::{Request, Response};

/// Lookup key for a cached response: (method, full URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

impl CacheKey {
  pub fn for_request(request: &Request) -> Self {
    Self {
      method: request.method.as_str().to_string(),
      url: request.url.to_string(),
    }
  }

  /// Stable, fixed-length hash used as the storage key.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response together with the generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub key: CacheKey,
  pub response: Response,
  /// Name of the cache generation holding this entry
  pub generation: String,
  /// When the entry was (last) written
  pub stored_at: DateTime<Utc>,
}

/// A named cache generation (`<prefix><version>`).
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
  pub name: String,
  pub created_at: DateTime<Utc>,
  /// Set once the generation has been promoted to active
  pub activated_at: Option<DateTime<Utc>>,
}

/// Trait for response cache backends.
///
/// Entries are written wholesale; there is no partial update.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open_cache(&self, name: &str) -> Result<()>;

  /// All cache generations, oldest first.
  fn generations(&self) -> Result<Vec<Generation>>;

  /// Get one generation by name.
  fn generation(&self, name: &str) -> Result<Option<Generation>>;

  /// Record that a generation has been promoted to active.
  fn mark_activated(&self, name: &str) -> Result<()>;

  /// Delete a cache and all of its entries. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Get a stored response by key.
  fn get_response(&self, cache_name: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Store (or replace) one response in an existing cache.
  ///
  /// Returns false without writing when the cache does not exist (never
  /// created, or deleted by a newer generation's activation).
  fn put_response(&self, cache_name: &str, key: &CacheKey, response: &Response)
    -> Result<bool>;

  /// Store a set of responses atomically: either all are written or none.
  /// This is the only write that creates the cache.
  fn put_all(&self, cache_name: &str, entries: &[(CacheKey, Response)]) -> Result<()>;
}
