use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use super::{DataAvailabilityReader, StorageService};
use crate::common::{content_hash, now_unix, ExpirationPolicy, StorageError};

#[derive(Debug)]
struct Entry {
    data: Bytes,
    expiration: u64,
}

/// An in-memory backend for the storage service.
///
/// Entries are kept until [`InMemoryStorageService::purge_expired`] is called after their
/// expiration has passed.
#[derive(Debug, Default)]
pub struct InMemoryStorageService {
    /// A map from content hash to the stored entry.
    entries: RwLock<HashMap<B256, Entry>>,
}

impl InMemoryStorageService {
    /// Creates a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store with room for `cap` entries.
    pub fn with_capacity(cap: usize) -> Self {
        Self { entries: RwLock::new(HashMap::with_capacity(cap)) }
    }

    /// Returns the expiration recorded for `hash`, if present.
    pub async fn expiration_of(&self, hash: &B256) -> Option<u64> {
        self.entries.read().await.get(hash).map(|e| e.expiration)
    }

    /// Returns the number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Removes every entry whose expiration is before `now`. Returns the number removed.
    pub async fn purge_expired(&self, now: u64) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expiration >= now);
        before - entries.len()
    }
}

#[async_trait]
impl DataAvailabilityReader for InMemoryStorageService {
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
        self.entries.read().await.get(&hash).map(|e| e.data.clone()).ok_or(StorageError::NotFound)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
        Ok(ExpirationPolicy::DiscardAfterDataTimeout)
    }
}

#[async_trait]
impl StorageService for InMemoryStorageService {
    async fn put(&self, data: Bytes, expiration: u64) -> Result<(), StorageError> {
        let hash = content_hash(&data);
        trace!(?hash, len = data.len(), expiration, "put");

        let mut entries = self.entries.write().await;
        match entries.get_mut(&hash) {
            // content is immutable, only the retention may grow
            Some(existing) => existing.expiration = existing.expiration.max(expiration),
            None => {
                entries.insert(hash, Entry { data, expiration });
            }
        }
        Ok(())
    }

    async fn sync(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
