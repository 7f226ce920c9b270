//! Local key-value persistence.
//!
//! The cache store writes through [`KeyValueStore`], which has a `SQLite`
//! implementation for on-disk use and an in-memory one for tests and
//! ephemeral sessions. Values are opaque strings; callers own the encoding.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{DaylineError, Result};

/// Generic string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn remove(&self, key: &str) -> Result<()>;

    /// List keys starting with `prefix`, in lexical order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every key starting with `prefix`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or deleting fails.
    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_with_prefix(prefix)?;
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }
}

fn poisoned<T>(_: T) -> DaylineError {
    DaylineError::Storage("key-value store lock poisoned".to_string())
}

// =============================================================================
// In-memory store
// =============================================================================

/// Process-local store backed by a sorted map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .map_err(poisoned)?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

// =============================================================================
// SQLite store
// =============================================================================

const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "CREATE TABLE IF NOT EXISTS kv (\
        key TEXT PRIMARY KEY NOT NULL,\
        value TEXT NOT NULL,\
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))\
    );";

/// `SQLite`-backed store with a single `kv` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Create or open a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| DaylineError::Storage(format!("open cache db: {e}")))?;
        tracing::debug!(?path, "Opened cache database");

        Self::init(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DaylineError::Storage(format!("open in-memory db: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| DaylineError::Storage(format!("read schema version: {e}")))?;

        if version > SCHEMA_VERSION {
            return Err(DaylineError::Other(anyhow::anyhow!(
                "cache db schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA_V1).map_err(|e| {
                DaylineError::Other(anyhow::anyhow!("apply schema v{SCHEMA_VERSION}: {e}"))
            })?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| {
                    DaylineError::Other(anyhow::anyhow!(
                        "record schema v{SCHEMA_VERSION}: {e}"
                    ))
                })?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Length of `prefix` in characters, as `substr` counts it.
fn prefix_len(prefix: &str) -> i64 {
    i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX)
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| DaylineError::Storage(format!("read {key}: {e}")))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now')) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )
        .map_err(|e| DaylineError::Storage(format!("write {key}: {e}")))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])
            .map_err(|e| DaylineError::Storage(format!("delete {key}: {e}")))?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn
            .prepare_cached("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key")
            .map_err(|e| DaylineError::Storage(format!("prepare key scan: {e}")))?;

        let rows = stmt
            .query_map(params![prefix, prefix_len(prefix)], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| DaylineError::Storage(format!("scan keys: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DaylineError::Storage(format!("scan keys: {e}")))
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.execute(
            "DELETE FROM kv WHERE substr(key, 1, ?2) = ?1",
            params![prefix, prefix_len(prefix)],
        )
        .map_err(|e| DaylineError::Storage(format!("delete prefix {prefix}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        Connection::open(&path)
            .unwrap()
            .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = SqliteStore::open(&path).unwrap_err();
        assert!(matches!(err, DaylineError::Other(_)));
        assert!(err.to_string().contains("newer than supported"));
    }

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("a").unwrap(), None);

        store.set("cache:a", "1").unwrap();
        store.set("cache:b", "2").unwrap();
        store.set("other", "3").unwrap();
        store.set("cache:a", "overwritten").unwrap();

        assert_eq!(store.get("cache:a").unwrap().as_deref(), Some("overwritten"));
        assert_eq!(
            store.keys_with_prefix("cache:").unwrap(),
            vec!["cache:a".to_string(), "cache:b".to_string()]
        );

        store.remove("cache:b").unwrap();
        store.remove("never-existed").unwrap();
        assert_eq!(store.get("cache:b").unwrap(), None);

        assert_eq!(store.remove_prefix("cache:").unwrap(), 1);
        assert!(store.keys_with_prefix("cache:").unwrap().is_empty());
        assert_eq!(store.get("other").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn sqlite_store_contract() {
        exercise(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn sqlite_prefix_is_literal() {
        // `_` and `%` in the prefix match literally
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("cache:a_b", "1").unwrap();
        store.set("cache:axb", "2").unwrap();

        assert_eq!(store.keys_with_prefix("cache:a_").unwrap(), vec!["cache:a_b"]);
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cache.sqlite");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("cache:plan", "{}").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("cache:plan").unwrap().as_deref(), Some("{}"));
    }
}
