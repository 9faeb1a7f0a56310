use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use tracing::warn;

use super::{DataAvailabilityReader, StorageService};
use crate::common::{content_hash, ExpirationPolicy, StorageError};

/// Wraps a storage service so that failed writes are logged and reported as success.
///
/// Reads and `sync` are passed through untouched.
#[derive(Debug)]
pub struct LogOnWriteError<S> {
    inner: S,
}

impl<S> LogOnWriteError<S> {
    /// Wraps the given storage service.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns the wrapped storage service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: StorageService> DataAvailabilityReader for LogOnWriteError<S> {
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
        self.inner.get_by_hash(hash).await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.inner.health_check().await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
        self.inner.expiration_policy().await
    }
}

#[async_trait]
impl<S: StorageService> StorageService for LogOnWriteError<S> {
    async fn put(&self, data: Bytes, expiration: u64) -> Result<(), StorageError> {
        let hash = content_hash(&data);
        if let Err(err) = self.inner.put(data, expiration).await {
            warn!(?hash, %err, "Ignoring storage write error");
        }
        Ok(())
    }

    async fn sync(&self) -> Result<(), StorageError> {
        self.inner.sync().await
    }
}
