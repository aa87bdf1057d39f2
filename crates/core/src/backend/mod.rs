//! Storage backends for cached pages.
//!
//! [`Backend`] is the facade the request path talks to. It owns exactly one
//! [`StorageEngine`] chosen from the configured [`BackendKind`] and an
//! aliveness flag fixed when the engine is initialised. Every public method
//! checks that flag first and short-circuits with a miss/failure without
//! touching the store when the engine is down.
//!
//! Engines:
//! - [`LocalStore`]: process memory
//! - [`PooledStore`]: memcached servers (text or binary protocol), client-side sharding
//! - [`SqliteStore`]: one SQLite file, keys always hashed

pub mod local;
pub mod pooled;
pub mod structured;
pub mod ttl;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use bytes::Bytes;

use crate::Error;
use crate::config::{BackendKind, CacheConfig};

pub use local::LocalStore;
pub use pooled::{PooledStore, Protocol, ServerAddress, ServerDescriptor, parse_hosts};
pub use structured::SqliteStore;
pub use ttl::{Expiry, RELATIVE_TTL_LIMIT};

/// Raw capability set every storage engine implements.
///
/// Engines never check aliveness themselves; [`Backend`] does that once for all.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open connections or handles. An error leaves the backend offline.
    async fn init(&mut self) -> Result<(), Error>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error>;

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<bool, Error>;

    /// Clear everything the engine manages, including entries owned by other applications.
    async fn flush(&self) -> Result<bool, Error>;

    /// Delete one key. `Ok(false)` means the key did not exist.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// Best-effort reachability per server id.
    async fn status(&self) -> BTreeMap<String, bool>;
}

/// Build the engine registered for a backend kind.
pub async fn engine_for(config: &CacheConfig) -> Box<dyn StorageEngine> {
    match config.cache_type {
        BackendKind::Local => Box::new(LocalStore::new()),
        BackendKind::Memcache => Box::new(PooledStore::new(parse_hosts(&config.hosts), Protocol::Text, None)),
        BackendKind::Memcached => {
            let protocol = if config.memcached_binary { Protocol::Binary } else { Protocol::Text };
            let credentials = if config.memcached_binary {
                config.sasl_credentials().map(|(user, pass)| (user.to_string(), pass.to_string()))
            } else {
                None
            };
            let store = PooledStore::new(parse_hosts(&config.hosts), protocol, credentials);
            Box::new(store.with_kind(BackendKind::Memcached))
        }
        BackendKind::Sqlite => Box::new(SqliteStore::new(config.db_path.clone())),
    }
}

/// Storage facade with a fixed aliveness flag.
pub struct Backend {
    engine: Box<dyn StorageEngine>,
    alive: bool,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.engine.kind())
            .field("alive", &self.alive)
            .finish()
    }
}

impl Backend {
    /// Construct and initialise the engine selected by `config`.
    pub async fn connect(config: &CacheConfig) -> Self {
        Self::with_engine(engine_for(config).await).await
    }

    /// Initialise an already constructed engine.
    pub async fn with_engine(mut engine: Box<dyn StorageEngine>) -> Self {
        tracing::debug!(engine = engine.kind().as_str(), "init starting");
        let alive = match engine.init().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(engine = engine.kind().as_str(), error = %e, "backend init failed, caching disabled");
                false
            }
        };
        Self { engine, alive }
    }

    pub fn kind(&self) -> BackendKind {
        self.engine.kind()
    }

    pub fn is_alive(&self) -> bool {
        if !self.alive {
            tracing::debug!(engine = self.engine.kind().as_str(), "backend is not active");
        }
        self.alive
    }

    /// Fetch a value. Offline engines and read failures yield a miss.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if !self.is_alive() {
            return None;
        }

        tracing::debug!(key, "get entry");
        match self.engine.get(key).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                tracing::debug!(key, "failed to get entry");
                None
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "read failed, treating as miss");
                None
            }
        }
    }

    /// Store a value for `ttl` seconds (0 = no expiry).
    pub async fn set(&self, key: &str, value: Bytes, ttl: u64) -> bool {
        if !self.is_alive() {
            return false;
        }

        let expiry = Expiry::from_ttl_now(ttl);
        tracing::debug!(key, ttl, ?expiry, "set entry");
        match self.engine.set(key, value, expiry).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(key, "failed to set entry");
                false
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to set entry");
                false
            }
        }
    }

    pub async fn flush(&self) -> bool {
        if !self.is_alive() {
            return false;
        }

        tracing::info!(engine = self.engine.kind().as_str(), "flushing cache");
        match self.engine.flush().await {
            Ok(flushed) => {
                if !flushed {
                    tracing::warn!("failed to empty cache");
                }
                flushed
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to empty cache");
                false
            }
        }
    }

    /// Best-effort deletion; each failure is logged and skipped.
    pub async fn clear(&self, keys: &BTreeSet<String>) {
        if !self.is_alive() {
            return;
        }

        for key in keys {
            match self.engine.delete(key).await {
                Ok(true) => tracing::debug!(key = %key, "entry deleted"),
                Ok(false) => tracing::debug!(key = %key, "unable to delete entry"),
                Err(e) => tracing::debug!(key = %key, error = %e, "unable to delete entry"),
            }
        }
    }

    /// Per-server reachability; `None` when the backend is offline.
    pub async fn status(&self) -> Option<BTreeMap<String, bool>> {
        if !self.is_alive() {
            return None;
        }
        Some(self.engine.status().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine that fails init and counts every storage call.
    struct Unavailable {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StorageEngine for Unavailable {
        fn kind(&self) -> BackendKind {
            BackendKind::Memcached
        }

        async fn init(&mut self) -> Result<(), Error> {
            Err(Error::BackendUnreachable("servers list is empty".into()))
        }

        async fn get(&self, _key: &str) -> Result<Option<Bytes>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Bytes::from_static(b"x")))
        }

        async fn set(&self, _key: &str, _value: Bytes, _expiry: Expiry) -> Result<bool, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn flush(&self) -> Result<bool, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn delete(&self, _key: &str) -> Result<bool, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn status(&self) -> BTreeMap<String, bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            BTreeMap::new()
        }
    }

    #[tokio::test]
    async fn test_offline_backend_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Backend::with_engine(Box::new(Unavailable { calls: calls.clone() })).await;

        assert!(!backend.is_alive());
        assert!(backend.get("k").await.is_none());
        assert!(!backend.set("k", Bytes::from_static(b"v"), 60).await);
        assert!(!backend.flush().await);
        backend.clear(&BTreeSet::from(["k".to_string()])).await;
        assert!(backend.status().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_roundtrip_through_facade() {
        let config = CacheConfig { cache_type: BackendKind::Local, ..Default::default() };
        let backend = Backend::connect(&config).await;
        assert!(backend.is_alive());

        assert!(backend.set("data-k", Bytes::from_static(b"<html></html>"), 60).await);
        assert_eq!(backend.get("data-k").await, Some(Bytes::from_static(b"<html></html>")));

        backend.clear(&BTreeSet::from(["data-k".to_string(), "missing".to_string()])).await;
        assert!(backend.get("data-k").await.is_none());
    }

    #[tokio::test]
    async fn test_pooled_without_hosts_is_offline() {
        let config = CacheConfig { cache_type: BackendKind::Memcache, hosts: String::new(), ..Default::default() };
        let backend = Backend::connect(&config).await;
        assert!(!backend.is_alive());
        assert!(backend.get("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_memcached_kind_independent_of_protocol() {
        for memcached_binary in [false, true] {
            let config = CacheConfig { cache_type: BackendKind::Memcached, memcached_binary, ..Default::default() };
            assert_eq!(engine_for(&config).await.kind(), BackendKind::Memcached);
        }
        let config = CacheConfig { cache_type: BackendKind::Memcache, ..Default::default() };
        assert_eq!(engine_for(&config).await.kind(), BackendKind::Memcache);
    }

    #[tokio::test]
    async fn test_sqlite_engine_selected() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            cache_type: BackendKind::Sqlite,
            db_path: dir.path().join("cache.sqlite"),
            ..Default::default()
        };
        let backend = Backend::connect(&config).await;
        assert_eq!(backend.kind(), BackendKind::Sqlite);
        assert!(backend.is_alive());
        assert!(backend.set("k", Bytes::from_static(b"v"), 0).await);
        assert_eq!(backend.get("k").await, Some(Bytes::from_static(b"v")));
    }
}
