use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::StorageError;

/// Opaque byte-blob persistence keyed by name within a namespace.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Writes `value` under `key`, returning the number of bytes stored.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<usize, StorageError>;

    fn is_durable(&self) -> bool;
}

pub struct SqliteStore {
    conn: Connection,
    namespace: String,
}

impl SqliteStore {
    pub fn open(path: &Path, namespace: &str) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), namespace, "Opening key-value store");
        Self::with_connection(conn, namespace)
    }

    fn with_connection(conn: Connection, namespace: &str) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<usize, StorageError> {
        let rows = self.conn.execute(
            "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value",
            params![self.namespace, key, value],
        )?;
        debug!(namespace = %self.namespace, key, bytes = value.len(), rows, "Stored blob");
        Ok(if rows == 1 { value.len() } else { 0 })
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Volatile fallback used when the durable backend cannot be opened.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<usize, StorageError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(value.len())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_put_overwrites_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let mut store = SqliteStore::open(&path, "nodecfg").unwrap();
            assert_eq!(store.get("config").unwrap(), None);
            assert_eq!(store.put("config", b"first").unwrap(), 5);
            assert_eq!(store.put("config", b"second!").unwrap(), 7);
        }

        let store = SqliteStore::open(&path, "nodecfg").unwrap();
        assert_eq!(store.get("config").unwrap().as_deref(), Some(&b"second!"[..]));
        assert!(store.is_durable());
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let mut a = SqliteStore::open(&path, "a").unwrap();
        a.put("k", b"1").unwrap();
        let b = SqliteStore::open(&path, "b").unwrap();
        assert_eq!(b.get("k").unwrap(), None);
    }

    #[test]
    fn memory_store_is_not_durable() {
        let mut store = MemoryStore::new();
        store.put("k", &[1, 2, 3]).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![1, 2, 3]));
        assert!(!store.is_durable());
    }
}
