use std::sync::{Mutex, PoisonError};

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use hashbrown::HashMap;
use tracing::{debug, warn};

use super::BridgeContract;
use crate::{
    common::{content_hash, ExpirationPolicy, StorageError},
    storage::DataAvailabilityReader,
};

/// A reader that falls back to the bridge contract for keysets missing from the inner reader.
///
/// Keysets are anchored on chain when they are registered, so they stay recoverable even if no
/// committee member serves them any more. Keysets fetched from chain are cached.
#[derive(Debug)]
pub struct ChainFetchReader<R, C> {
    inner: R,
    bridge: C,
    keyset_cache: Mutex<HashMap<B256, Bytes>>,
}

impl<R: DataAvailabilityReader, C: BridgeContract> ChainFetchReader<R, C> {
    /// Wraps `inner`, fetching missing keysets through `bridge`.
    pub fn new(inner: R, bridge: C) -> Self {
        Self { inner, bridge, keyset_cache: Mutex::new(HashMap::new()) }
    }

    fn cached(&self, hash: &B256) -> Option<Bytes> {
        self.keyset_cache.lock().unwrap_or_else(PoisonError::into_inner).get(hash).cloned()
    }

    async fn fetch_keyset_from_chain(&self, hash: B256) -> Result<Bytes, StorageError> {
        let block = self.bridge.keyset_creation_block(hash).await?;
        if block == 0 {
            return Err(StorageError::NotFound);
        }

        for keyset in self.bridge.keysets_in_block(hash, block).await? {
            if content_hash(&keyset) == hash {
                debug!(?hash, block, "Fetched keyset from chain");
                self.keyset_cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(hash, keyset.clone());
                return Ok(keyset);
            }
        }

        Err(StorageError::NotFound)
    }
}

#[async_trait]
impl<R: DataAvailabilityReader, C: BridgeContract> DataAvailabilityReader
    for ChainFetchReader<R, C>
{
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
        if let Some(keyset) = self.cached(&hash) {
            return Ok(keyset);
        }

        let inner_err = match self.inner.get_by_hash(hash).await {
            Ok(data) => {
                let actual = content_hash(&data);
                if actual == hash {
                    return Ok(data);
                }
                warn!(?hash, "Inner reader returned data with the wrong hash");
                StorageError::HashMismatch { expected: hash, actual }
            }
            Err(StorageError::NotFound) => return self.fetch_keyset_from_chain(hash).await,
            Err(err) => {
                debug!(?hash, %err, "Inner reader failed, trying chain");
                err
            }
        };

        // a hash the chain doesn't know is not a keyset; report why the inner read failed
        match self.fetch_keyset_from_chain(hash).await {
            Err(StorageError::NotFound) => Err(inner_err),
            result => result,
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.inner.health_check().await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
        self.inner.expiration_policy().await
    }
}
