use std::sync::Arc;

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::ChainError;

mod contract;
pub use contract::SequencerInbox;

mod fetch;
pub use fetch::ChainFetchReader;

mod memory;
pub use memory::InMemoryBridge;

mod recover;
pub use recover::{
    recover_payload_from_batch, Preimages, RecoveryError, MIN_CERT_LIFETIME_SECONDS,
};

mod sync;
pub use sync::{
    new_syncing_fallback_storage_service, ChainSynchronizer, SyncCursor, SyncError,
    SyncToStorageConfig,
};

/// A batch-data-posted event emitted by the bridge contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDataEvent {
    /// The L1 block the event was emitted in.
    pub block_number: u64,
    /// Opaque batch data: the 40 byte batch header followed by the header byte and payload.
    pub data: Bytes,
}

/// A live stream of [`BatchDataEvent`]s in chain order.
///
/// The producer is stopped when the subscription is unsubscribed or dropped.
#[derive(Debug)]
pub struct BatchDataSubscription {
    events: mpsc::Receiver<Result<BatchDataEvent, ChainError>>,
    cancel: CancellationToken,
}

impl BatchDataSubscription {
    /// Creates a subscription reading from `events`. `cancel` is fired on unsubscribe.
    pub fn new(
        events: mpsc::Receiver<Result<BatchDataEvent, ChainError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { events, cancel }
    }

    /// Waits for the next event. Errors reported by the producer are passed through.
    pub async fn recv(&mut self) -> Result<BatchDataEvent, ChainError> {
        self.events.recv().await.unwrap_or(Err(ChainError::SubscriptionClosed))
    }

    /// Stops the producer. Already buffered events can still be received.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for BatchDataSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The parts of the L1 client and bridge contract the DAS depends on.
#[async_trait]
pub trait BridgeContract: Send + Sync {
    /// Returns the current head block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Subscribes to batch-data-posted events from `from_block` on. `None` starts at the
    /// current head.
    async fn subscribe_batch_data(
        &self,
        from_block: Option<u64>,
    ) -> Result<BatchDataSubscription, ChainError>;

    /// Returns the block in which the keyset was registered, or 0 if it is unknown.
    async fn keyset_creation_block(&self, keyset_hash: B256) -> Result<u64, ChainError>;

    /// Returns the keyset bytes registered under `keyset_hash` in the given block.
    async fn keysets_in_block(
        &self,
        keyset_hash: B256,
        block: u64,
    ) -> Result<Vec<Bytes>, ChainError>;
}

#[async_trait]
impl<T: BridgeContract + ?Sized> BridgeContract for Arc<T> {
    async fn block_number(&self) -> Result<u64, ChainError> {
        (**self).block_number().await
    }

    async fn subscribe_batch_data(
        &self,
        from_block: Option<u64>,
    ) -> Result<BatchDataSubscription, ChainError> {
        (**self).subscribe_batch_data(from_block).await
    }

    async fn keyset_creation_block(&self, keyset_hash: B256) -> Result<u64, ChainError> {
        (**self).keyset_creation_block(keyset_hash).await
    }

    async fn keysets_in_block(
        &self,
        keyset_hash: B256,
        block: u64,
    ) -> Result<Vec<Bytes>, ChainError> {
        (**self).keysets_in_block(keyset_hash, block).await
    }
}
