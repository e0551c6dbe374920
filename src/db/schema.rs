/// Schema for the worker's durable store.
///
/// `cache_generations` lists every named cache (`<prefix><version>`);
/// `cache_entries` holds the stored GET responses of each generation;
/// `offline_queue` is the append-only log of mutations waiting to be relayed.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    activated_at TEXT
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, entry_key)
);

CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'synced')),
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_status ON offline_queue(status, id);
"#;
