//! SQLite implementation of the cache registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::entry::{CacheEntry, RequestKey, Response};
use super::traits::Registry;
use crate::error::StorageError;

/// SQLite-based registry. Survives process restarts.
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking pool, so callers only ever see an `.await`.
#[derive(Clone)]
pub struct SqliteRegistry {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
  /// Open the registry at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create registry directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open registry at {}: {}", path.display(), e))?;

    conn
      .execute_batch(REGISTRY_SCHEMA)
      .map_err(|e| eyre!("Failed to run registry migrations: {}", e))?;

    tracing::debug!(path = %path.display(), "opened cache registry");

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("registry.db"))
  }

  async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut conn = conn
        .lock()
        .map_err(|e| StorageError::Poisoned(e.to_string()))?;
      op(&mut conn)
    })
    .await?
  }
}

/// Schema for registry tables.
const REGISTRY_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (namespace, request key); replaced wholesale on rewrite
CREATE TABLE IF NOT EXISTS entries (
    namespace TEXT NOT NULL,
    key_digest TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key_digest),
    FOREIGN KEY (namespace) REFERENCES namespaces(name) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS lifecycle (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const ACTIVE_VERSION: &str = "active_version";
const WAITING_VERSION: &str = "waiting_version";

fn insert_entry(conn: &Connection, namespace: &str, entry: &CacheEntry) -> Result<(), StorageError> {
  let headers = serde_json::to_string(&entry.response.headers)?;
  conn.execute(
    "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
    params![namespace],
  )?;
  conn.execute(
    "INSERT OR REPLACE INTO entries (namespace, key_digest, method, url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      namespace,
      entry.key.digest(),
      entry.key.method,
      entry.key.url,
      entry.response.status,
      headers,
      entry.response.body,
      entry.cached_at.to_rfc3339(),
    ],
  )?;
  Ok(())
}

#[async_trait]
impl Registry for SqliteRegistry {
  async fn namespaces(&self) -> Result<Vec<String>, StorageError> {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM namespaces ORDER BY name")?;
        let names = stmt
          .query_map([], |row| row.get(0))?
          .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
      })
      .await
  }

  async fn create_namespace(&self, namespace: &str) -> Result<(), StorageError> {
    let namespace = namespace.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
          params![namespace],
        )?;
        Ok(())
      })
      .await
  }

  async fn lookup(
    &self,
    namespace: &str,
    key: &RequestKey,
  ) -> Result<Option<CacheEntry>, StorageError> {
    let namespace = namespace.to_string();
    let key = key.clone();
    self
      .with_conn(move |conn| {
        let row: Option<(u16, String, Vec<u8>, String)> = conn
          .query_row(
            "SELECT status, headers, body, cached_at FROM entries
             WHERE namespace = ? AND key_digest = ?",
            params![namespace, key.digest()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()?;

        let Some((status, headers, body, cached_at)) = row else {
          return Ok(None);
        };

        let headers = serde_json::from_str(&headers)?;
        let cached_at = parse_datetime(&cached_at).map_err(|reason| StorageError::Corrupt {
          key: key.to_string(),
          reason,
        })?;

        Ok(Some(CacheEntry {
          key,
          response: Response {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      })
      .await
  }

  async fn store(&self, namespace: &str, entry: CacheEntry) -> Result<(), StorageError> {
    let namespace = namespace.to_string();
    self
      .with_conn(move |conn| insert_entry(conn, &namespace, &entry))
      .await
  }

  async fn replace_namespace(
    &self,
    namespace: &str,
    entries: Vec<CacheEntry>,
  ) -> Result<(), StorageError> {
    let namespace = namespace.to_string();
    self
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE namespace = ?", params![namespace])?;
        tx.execute(
          "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
          params![namespace],
        )?;
        for entry in &entries {
          insert_entry(&tx, &namespace, entry)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn delete_namespace(&self, namespace: &str) -> Result<bool, StorageError> {
    let namespace = namespace.to_string();
    self
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE namespace = ?", params![namespace])?;
        let removed = tx.execute("DELETE FROM namespaces WHERE name = ?", params![namespace])?;
        tx.commit()?;
        Ok(removed > 0)
      })
      .await
  }

  async fn entry_count(&self, namespace: &str) -> Result<usize, StorageError> {
    let namespace = namespace.to_string();
    self
      .with_conn(move |conn| {
        let count: i64 = conn.query_row(
          "SELECT COUNT(*) FROM entries WHERE namespace = ?",
          params![namespace],
          |row| row.get(0),
        )?;
        Ok(count as usize)
      })
      .await
  }

  async fn active_version(&self) -> Result<Option<String>, StorageError> {
    self.read_marker(ACTIVE_VERSION).await
  }

  async fn set_active_version(&self, version: &str) -> Result<(), StorageError> {
    self.write_marker(ACTIVE_VERSION, Some(version)).await
  }

  async fn waiting_version(&self) -> Result<Option<String>, StorageError> {
    self.read_marker(WAITING_VERSION).await
  }

  async fn set_waiting_version(&self, version: Option<&str>) -> Result<(), StorageError> {
    self.write_marker(WAITING_VERSION, version).await
  }
}

impl SqliteRegistry {
  async fn read_marker(&self, key: &'static str) -> Result<Option<String>, StorageError> {
    self
      .with_conn(move |conn| {
        let value = conn
          .query_row(
            "SELECT value FROM lifecycle WHERE key = ?",
            params![key],
            |row| row.get(0),
          )
          .optional()?;
        Ok(value)
      })
      .await
  }

  /// Set a lifecycle marker, or remove it when `value` is `None`.
  async fn write_marker(&self, key: &'static str, value: Option<&str>) -> Result<(), StorageError> {
    let value = value.map(str::to_string);
    self
      .with_conn(move |conn| {
        match value {
          Some(value) => conn.execute(
            "INSERT OR REPLACE INTO lifecycle (key, value) VALUES (?, ?)",
            params![key, value],
          )?,
          None => conn.execute("DELETE FROM lifecycle WHERE key = ?", params![key])?,
        };
        Ok(())
      })
      .await
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("bad timestamp '{}': {}", s, e))
}
