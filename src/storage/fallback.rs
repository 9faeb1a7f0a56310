use std::sync::{Mutex, PoisonError};

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use hashbrown::HashSet;
use tracing::{debug, trace, warn};

use super::{DataAvailabilityReader, StorageService};
use crate::common::{content_hash, expiry_from_now, ExpirationPolicy, StorageError};

/// Options for a [`FallbackStorageService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackConfig {
    /// How long to retain data copied in from the backup. `u64::MAX` means forever.
    pub backup_retention_seconds: u64,
    /// If set, a failed write of backup data into the primary is logged, not returned.
    pub ignore_retention_write_errors: bool,
    /// If set, a get that misses the primary while another get for the same hash is already
    /// reading from the backup returns `NotFound`. This breaks cycles between services that
    /// use each other as backups.
    pub prevent_recursive_gets: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            backup_retention_seconds: u64::MAX,
            ignore_retention_write_errors: true,
            prevent_recursive_gets: true,
        }
    }
}

/// A storage service that reads from a backup when the primary misses, copying what it finds
/// into the primary.
#[derive(Debug)]
pub struct FallbackStorageService<P, B> {
    primary: P,
    backup: B,
    config: FallbackConfig,
    /// Hashes currently being fetched from the backup.
    in_flight: Mutex<HashSet<B256>>,
}

impl<P: StorageService, B: DataAvailabilityReader> FallbackStorageService<P, B> {
    /// Creates a new fallback service over the given primary and backup.
    pub fn new(primary: P, backup: B, config: FallbackConfig) -> Self {
        Self { primary, backup, config, in_flight: Mutex::new(HashSet::new()) }
    }

    /// The primary storage service.
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// The backup reader.
    pub fn backup(&self) -> &B {
        &self.backup
    }

    /// Marks `hash` as in flight. Returns `None` if it already was.
    fn begin_fetch(&self, hash: B256) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(hash).then_some(InFlightGuard { set: &self.in_flight, hash })
    }

    async fn get_from_backup(&self, hash: B256) -> Result<Bytes, StorageError> {
        let _guard = if self.config.prevent_recursive_gets {
            match self.begin_fetch(hash) {
                Some(guard) => Some(guard),
                None => {
                    debug!(?hash, "Fetch from backup already in flight, returning not found");
                    return Err(StorageError::NotFound);
                }
            }
        } else {
            None
        };

        trace!(?hash, "Reading from backup");
        let data = self.backup.get_by_hash(hash).await?;

        let actual = content_hash(&data);
        if actual != hash {
            warn!(expected = ?hash, ?actual, "Backup returned data with the wrong hash");
            return Err(StorageError::HashMismatch { expected: hash, actual });
        }

        let expiration = expiry_from_now(self.config.backup_retention_seconds);
        if let Err(err) = self.primary.put(data.clone(), expiration).await {
            if !self.config.ignore_retention_write_errors {
                return Err(err);
            }
            warn!(?hash, %err, "Failed to retain backup data in primary");
        }

        Ok(data)
    }
}

/// Removes its hash from the in-flight set when dropped, whether the fetch succeeded,
/// failed or was cancelled.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<B256>>,
    hash: B256,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.hash);
    }
}

#[async_trait]
impl<P: StorageService, B: DataAvailabilityReader> DataAvailabilityReader
    for FallbackStorageService<P, B>
{
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
        match self.primary.get_by_hash(hash).await {
            Err(StorageError::NotFound) => self.get_from_backup(hash).await,
            res => res,
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.primary.health_check().await?;
        self.backup.health_check().await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
        self.primary.expiration_policy().await
    }
}

#[async_trait]
impl<P: StorageService, B: DataAvailabilityReader> StorageService
    for FallbackStorageService<P, B>
{
    async fn put(&self, data: Bytes, expiration: u64) -> Result<(), StorageError> {
        self.primary.put(data, expiration).await
    }

    async fn sync(&self) -> Result<(), StorageError> {
        self.primary.sync().await
    }
}
