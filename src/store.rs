//! Durable key-value storage for tracking state.
//!
//! The tracking session and the alarm flag are the only things persisted.
//! Values are opaque bytes; the JSON helpers cover the typed cases.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// Key for the persisted [`TrackingSession`](crate::TrackingSession).
pub const SESSION_KEY: &str = "tracking_session";

/// Key for the persisted alarm enabled flag.
pub const ALARM_ENABLED_KEY: &str = "alarm_enabled";

/// Minimal durable store the engine writes through to.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Read and deserialize a JSON value. Absent keys yield `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize a value as JSON and write it.
pub fn save_json<T: Serialize>(store: &mut dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, &bytes)
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store, used when no durable backend is configured and in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

#[cfg(feature = "persistence")]
mod sqlite {
    use log::info;
    use rusqlite::{params, Connection, OptionalExtension};

    use super::KeyValueStore;
    use crate::{Result, TrackingError};

    /// SQLite-backed store. Every write is committed before returning.
    pub struct SqliteStore {
        db: Connection,
    }

    impl SqliteStore {
        /// Open (or create) a store at the given database path.
        pub fn open(db_path: &str) -> Result<Self> {
            let db = Connection::open(db_path).map_err(|e| TrackingError::PersistenceReadFailure {
                key: db_path.to_string(),
                message: e.to_string(),
            })?;
            Self::init_schema(&db).map_err(|e| TrackingError::PersistenceWriteFailure {
                key: "kv_store".to_string(),
                message: e.to_string(),
            })?;
            info!("[SqliteStore] Opened {}", db_path);
            Ok(Self { db })
        }

        /// Create an in-memory database (for testing).
        pub fn in_memory() -> Result<Self> {
            Self::open(":memory:")
        }

        fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
                );
            "#,
            )
        }
    }

    impl KeyValueStore for SqliteStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.db
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()
                .map_err(|e| TrackingError::PersistenceReadFailure {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }

        fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
            self.db
                .execute(
                    "INSERT INTO kv_store (key, value, updated_at)
                     VALUES (?, ?, strftime('%s', 'now'))
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value],
                )
                .map(|_| ())
                .map_err(|e| TrackingError::PersistenceWriteFailure {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }

        fn remove(&mut self, key: &str) -> Result<()> {
            self.db
                .execute("DELETE FROM kv_store WHERE key = ?", params![key])
                .map(|_| ())
                .map_err(|e| TrackingError::PersistenceWriteFailure {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
    }
}

#[cfg(feature = "persistence")]
pub use sqlite::SqliteStore;

#[cfg(test)]
pub(crate) use read_only::ReadOnlyStore;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackingError;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", b"one").unwrap();
        store.set("a", b"two").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"two".to_vec()));

        store.remove("a").unwrap();
        assert!(store.is_empty());
        // Removing an absent key is not an error
        store.remove("a").unwrap();
    }

    #[test]
    fn test_json_helpers() {
        let mut store = MemoryStore::new();
        save_json(&mut store, ALARM_ENABLED_KEY, &true).unwrap();
        let loaded: Option<bool> = load_json(&store, ALARM_ENABLED_KEY).unwrap();
        assert_eq!(loaded, Some(true));

        let absent: Option<bool> = load_json(&store, "missing").unwrap();
        assert_eq!(absent, None);
    }

    #[test]
    fn test_corrupt_json_is_serialization_error() {
        let mut store = MemoryStore::new();
        store.set(SESSION_KEY, b"{truncated").unwrap();
        let result: Result<Option<bool>> = load_json(&store, SESSION_KEY);
        assert!(matches!(result, Err(TrackingError::Serialization { .. })));
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let mut store = ReadOnlyStore::default();
        assert!(matches!(
            store.set("k", b"v"),
            Err(TrackingError::PersistenceWriteFailure { .. })
        ));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.db");
        let path = path.to_str().unwrap();

        {
            let mut store = SqliteStore::open(path).unwrap();
            store.set(SESSION_KEY, b"{\"x\":1}").unwrap();
            store.set(SESSION_KEY, b"{\"x\":2}").unwrap();
            store.set(ALARM_ENABLED_KEY, b"true").unwrap();
            store.remove(ALARM_ENABLED_KEY).unwrap();
        }

        let store = SqliteStore::open(path).unwrap();
        assert_eq!(store.get(SESSION_KEY).unwrap(), Some(b"{\"x\":2}".to_vec()));
        assert_eq!(store.get(ALARM_ENABLED_KEY).unwrap(), None);
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_in_memory() {
        let mut store = SqliteStore::in_memory().unwrap();
        save_json(&mut store, "n", &42u32).unwrap();
        let n: Option<u32> = load_json(&store, "n").unwrap();
        assert_eq!(n, Some(42));
    }
}
