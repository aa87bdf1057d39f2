//! SQLite engine.
//!
//! One `entries` table in a single database file, opened in WAL mode and run
//! on tokio-rusqlite's background thread. Expired rows are treated as misses
//! and purged when the store is opened.

pub mod migrations;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};

use super::{Expiry, StorageEngine};
use crate::Error;
use crate::config::BackendKind;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

/// Database-file storage engine.
#[derive(Debug)]
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Option<Connection>,
}

impl SqliteStore {
    /// Engine that opens `path` on init.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: Some(path.as_ref().to_path_buf()), conn: None }
    }

    /// Engine backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self { path: None, conn: None }
    }

    fn conn(&self) -> Result<&Connection, Error> {
        self.conn.as_ref().ok_or_else(|| Error::BackendUnreachable("sqlite store not opened".into()))
    }

    /// Remove expired rows; returns how many were deleted.
    pub async fn purge_expired(&self) -> Result<usize, Error> {
        let now = chrono::Utc::now().timestamp();
        self.conn()?
            .call(move |conn| -> Result<usize, Error> {
                Ok(conn.execute(
                    "DELETE FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )?)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl StorageEngine for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn init(&mut self) -> Result<(), Error> {
        let conn = match &self.path {
            Some(path) => Connection::open(path).await,
            None => Connection::open_in_memory().await,
        }
        .map_err(|e| Error::BackendUnreachable(e.to_string()))?;

        conn.call(|conn| conn.execute_batch(PRAGMAS)).await.map_err(Error::Database)?;
        migrations::run(&conn).await?;
        self.conn = Some(conn);

        let purged = self.purge_expired().await?;
        if purged > 0 {
            tracing::debug!(purged, "expired entries removed");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let key = key.to_string();
        let now = chrono::Utc::now().timestamp();
        self.conn()?
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                Ok(conn
                    .query_row(
                        "SELECT value FROM entries WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                        params![key, now],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
            .map(|value| value.map(Bytes::from))
            .map_err(|e| Error::StorageRead(Error::from(e).to_string()))
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<bool, Error> {
        let key = key.to_string();
        let now = chrono::Utc::now().timestamp();
        let expires_at = expiry.deadline(now);
        self.conn()?
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "INSERT INTO entries (key, value, expires_at, stored_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at,
                        stored_at = excluded.stored_at",
                    params![key, &value[..], expires_at, now],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(|e| Error::StorageWrite(Error::from(e).to_string()))
    }

    async fn flush(&self) -> Result<bool, Error> {
        self.conn()?
            .call(|conn| -> Result<bool, Error> {
                conn.execute("DELETE FROM entries", [])?;
                Ok(true)
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn()?
            .call(move |conn| -> Result<bool, Error> {
                Ok(conn.execute("DELETE FROM entries WHERE key = ?1", params![key])? > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn status(&self) -> BTreeMap<String, bool> {
        let id = self.path.as_ref().map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
        let reachable = match self.conn() {
            Ok(conn) => conn
                .call(|conn| conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get::<_, i64>(0)))
                .await
                .is_ok(),
            Err(_) => false,
        };
        BTreeMap::from([(id, reachable)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        let mut store = SqliteStore::in_memory();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let store = store().await;
        assert!(store.set("data-abc", Bytes::from_static(b"one"), Expiry::Never).await.unwrap());
        assert!(store.set("data-abc", Bytes::from_static(b"two"), Expiry::Relative(60)).await.unwrap());
        assert_eq!(store.get("data-abc").await.unwrap(), Some(Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn test_expired_row_is_a_miss() {
        let store = store().await;
        let past = chrono::Utc::now().timestamp() - 5;
        store.set("k", Bytes::from_static(b"v"), Expiry::Absolute(past)).await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_flush() {
        let store = store().await;
        store.set("a", Bytes::from_static(b"1"), Expiry::Never).await.unwrap();
        store.set("b", Bytes::from_static(b"2"), Expiry::Never).await.unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.flush().await.unwrap());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unopened_store_errors() {
        let store = SqliteStore::in_memory();
        assert!(matches!(store.get("k").await, Err(Error::BackendUnreachable(_))));
        assert_eq!(store.status().await.get(":memory:"), Some(&false));
    }

    #[tokio::test]
    async fn test_file_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");

        let mut first = SqliteStore::new(&path);
        first.init().await.unwrap();
        first.set("k", Bytes::from_static(b"v"), Expiry::Never).await.unwrap();
        drop(first);

        let mut second = SqliteStore::new(&path);
        second.init().await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    }
}
