//! In-process memory engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{Expiry, StorageEngine};
use crate::Error;
use crate::config::BackendKind;

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Concurrent map with lazy expiry. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    entries: Arc<DashMap<String, LocalEntry>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StorageEngine for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<bool, Error> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = expiry.remaining(now).map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), LocalEntry { value, expires_at });
        Ok(true)
    }

    async fn flush(&self) -> Result<bool, Error> {
        self.entries.clear();
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn status(&self) -> BTreeMap<String, bool> {
        BTreeMap::from([("local".to_string(), true)])
    }
}
