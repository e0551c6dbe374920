//! SQLite implementation of the response cache.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::{CacheKey, CacheStorage, CachedResponse, Generation};
use crate::db::{parse_datetime, Database};
use crate::net::Response;

impl CacheStorage for Database {
  fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    insert_generation(&conn, name)
  }

  fn generations(&self) -> Result<Vec<Generation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT name, created_at, activated_at FROM cache_generations
         ORDER BY created_at, name",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, Option<String>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read cache row: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, activated_at)| to_generation(name, &created_at, activated_at))
      .collect()
  }

  fn generation(&self, name: &str) -> Result<Option<Generation>> {
    let conn = self.lock()?;

    let row: Option<(String, String, Option<String>)> = conn
      .query_row(
        "SELECT name, created_at, activated_at FROM cache_generations WHERE name = ?",
        params![name],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", name, e))?;

    row
      .map(|(name, created_at, activated_at)| to_generation(name, &created_at, activated_at))
      .transpose()
  }

  fn mark_activated(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    let updated = conn
      .execute(
        "UPDATE cache_generations SET activated_at = datetime('now')
         WHERE name = ? AND activated_at IS NULL",
        params![name],
      )
      .map_err(|e| eyre!("Failed to activate cache {}: {}", name, e))?;

    if updated == 0 {
      let exists: bool = conn
        .query_row(
          "SELECT EXISTS(SELECT 1 FROM cache_generations WHERE name = ?)",
          params![name],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to query cache {}: {}", name, e))?;
      if !exists {
        return Err(eyre!("Cannot activate unknown cache {}", name));
      }
    }

    Ok(())
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;
    let deleted = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn get_response(&self, cache_name: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE cache_name = ? AND entry_key = ?",
        params![cache_name, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry {}: {}", key.url, e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key.url, e))?;
        Ok(Some(CachedResponse {
          key: key.clone(),
          response: Response {
            status,
            headers,
            body,
          },
          generation: cache_name.to_string(),
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_response(
    &self,
    cache_name: &str,
    key: &CacheKey,
    response: &Response,
  ) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists: bool = tx
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM cache_generations WHERE name = ?)",
        params![cache_name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to query cache {}: {}", cache_name, e))?;
    if !exists {
      return Ok(false);
    }

    insert_entry(&tx, cache_name, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(true)
  }

  fn put_all(&self, cache_name: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_generation(&tx, cache_name)?;
    for (key, response) in entries {
      insert_entry(&tx, cache_name, key, response)?;
    }

    // Dropping the transaction without commit rolls every insert back.
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }
}

fn insert_generation(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name, created_at) VALUES (?, datetime('now'))",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  key: &CacheKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, entry_key, method, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        key.hash(),
        key.method,
        key.url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url, cache_name, e))?;
  Ok(())
}

fn to_generation(
  name: String,
  created_at: &str,
  activated_at: Option<String>,
) -> Result<Generation> {
  Ok(Generation {
    name,
    created_at: parse_datetime(created_at)?,
    activated_at: activated_at.as_deref().map(parse_datetime).transpose()?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(url: &str) -> CacheKey {
    CacheKey {
      method: "GET".to_string(),
      url: url.to_string(),
    }
  }

  #[test]
  fn test_put_and_get_response() {
    let db = Database::open_in_memory().unwrap();
    let resp = Response::new(200, "<html></html>").with_header("Content-Type", "text/html");

    db.open_cache("cache-v1").unwrap();
    db.put_response("cache-v1", &key("https://a/index.html"), &resp)
      .unwrap();

    let cached = db
      .get_response("cache-v1", &key("https://a/index.html"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, resp);
    assert_eq!(cached.generation, "cache-v1");

    // Same URL, other generation: miss
    assert!(db
      .get_response("cache-v2", &key("https://a/index.html"))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_put_overwrites_wholesale() {
    let db = Database::open_in_memory().unwrap();
    let k = key("https://a/data.json");
    db.open_cache("cache-v1").unwrap();
    db.put_response(
      "cache-v1",
      &k,
      &Response::new(200, "old").with_header("X-Old", "1"),
    )
    .unwrap();
    db.put_response("cache-v1", &k, &Response::new(200, "new"))
      .unwrap();

    let cached = db.get_response("cache-v1", &k).unwrap().unwrap();
    assert_eq!(cached.response.body, b"new");
    assert!(cached.response.headers.is_empty());
  }

  #[test]
  fn test_delete_cache_removes_entries() {
    let db = Database::open_in_memory().unwrap();
    let k = key("https://a/");
    db.open_cache("cache-v1").unwrap();
    db.put_response("cache-v1", &k, &Response::new(200, "x"))
      .unwrap();

    assert!(db.delete_cache("cache-v1").unwrap());
    assert!(!db.delete_cache("cache-v1").unwrap());
    assert!(db.get_response("cache-v1", &k).unwrap().is_none());
    assert!(db.generation("cache-v1").unwrap().is_none());
  }

  #[test]
  fn test_generations_and_activation() {
    let db = Database::open_in_memory().unwrap();
    db.open_cache("cache-v1").unwrap();
    db.open_cache("cache-v1").unwrap();
    db.open_cache("cache-v2").unwrap();

    let names: Vec<String> = db.generations().unwrap().into_iter().map(|g| g.name).collect();
    assert_eq!(names, vec!["cache-v1", "cache-v2"]);

    assert!(db.generation("cache-v2").unwrap().unwrap().activated_at.is_none());
    db.mark_activated("cache-v2").unwrap();
    db.mark_activated("cache-v2").unwrap();
    assert!(db.generation("cache-v2").unwrap().unwrap().activated_at.is_some());

    assert!(db.mark_activated("cache-v9").is_err());
  }

  #[test]
  fn test_put_response_never_recreates_a_deleted_cache() {
    let db = Database::open_in_memory().unwrap();
    let k = key("https://a/api/panel");
    db.put_all("cache-v1", &[(k.clone(), Response::new(200, "old"))])
      .unwrap();
    assert!(db.delete_cache("cache-v1").unwrap());

    assert!(!db.put_response("cache-v1", &k, &Response::new(200, "late")).unwrap());
    assert!(db.generation("cache-v1").unwrap().is_none());
    assert!(db.get_response("cache-v1", &k).unwrap().is_none());

    // Never-created caches are not created either
    assert!(!db.put_response("cache-v9", &k, &Response::new(200, "x")).unwrap());
    assert!(db.generations().unwrap().is_empty());
  }

  #[test]
  fn test_put_all_is_atomic_set() {
    let db = Database::open_in_memory().unwrap();
    let entries = vec![
      (key("https://a/"), Response::new(200, "root")),
      (key("https://a/index.html"), Response::new(200, "index")),
    ];
    db.put_all("cache-v1", &entries).unwrap();

    assert!(db.get_response("cache-v1", &key("https://a/")).unwrap().is_some());
    assert!(db
      .get_response("cache-v1", &key("https://a/index.html"))
      .unwrap()
      .is_some());
  }
}
