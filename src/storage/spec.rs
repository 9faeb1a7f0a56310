use std::sync::Arc;

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;

use crate::common::{ExpirationPolicy, StorageError};

/// Read-only access to content-addressed data.
#[async_trait]
pub trait DataAvailabilityReader: Send + Sync {
    /// Returns the preimage of `hash`, or [`StorageError::NotFound`] if it is absent.
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError>;

    /// Returns an error if the backend is unhealthy.
    async fn health_check(&self) -> Result<(), StorageError>;

    /// Returns how long the backend retains data.
    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError>;
}

/// A writable, content-addressed storage backend.
///
/// Data is stored under its [`content_hash`](crate::content_hash) and never mutated once put.
/// Re-putting identical content is a successful no-op, and `put` may be called concurrently.
/// The expiration is advisory: it is the earliest time at which the backend may purge the entry.
#[async_trait]
pub trait StorageService: DataAvailabilityReader {
    /// Stores `data`, to be retained at least until the UNIX time `expiration`.
    async fn put(&self, data: Bytes, expiration: u64) -> Result<(), StorageError>;

    /// Flushes any buffered state to the backend.
    async fn sync(&self) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: DataAvailabilityReader + ?Sized> DataAvailabilityReader for Arc<T> {
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
        (**self).get_by_hash(hash).await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        (**self).health_check().await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
        (**self).expiration_policy().await
    }
}

#[async_trait]
impl<T: StorageService + ?Sized> StorageService for Arc<T> {
    async fn put(&self, data: Bytes, expiration: u64) -> Result<(), StorageError> {
        (**self).put(data, expiration).await
    }

    async fn sync(&self) -> Result<(), StorageError> {
        (**self).sync().await
    }
}
