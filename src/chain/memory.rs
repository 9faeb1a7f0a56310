use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::{BatchDataEvent, BatchDataSubscription, BridgeContract};
use crate::common::{content_hash, ChainError};

#[derive(Debug, Default)]
struct ChainState {
    head: u64,
    events: Vec<BatchDataEvent>,
    keysets: HashMap<B256, (u64, Bytes)>,
}

/// A bridge contract backed by an in-memory event log. Useful for tests and local setups
/// without an L1 node.
///
/// Subscriptions are live: batches posted after subscribing are delivered too.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBridge {
    state: Arc<Mutex<ChainState>>,
    posted: Arc<Notify>,
}

impl InMemoryBridge {
    /// Creates an empty chain at block 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the head to `block`.
    pub fn set_head(&self, block: u64) {
        self.state().head = block;
    }

    /// Emits a batch data event in `block`, advancing the head if needed. Blocks must be
    /// posted in non-decreasing order.
    pub fn post_batch(&self, block: u64, data: impl Into<Bytes>) {
        {
            let mut state = self.state();
            state.head = state.head.max(block);
            state.events.push(BatchDataEvent { block_number: block, data: data.into() });
        }
        self.posted.notify_waiters();
    }

    /// Registers a keyset in `block`. Returns its hash.
    pub fn register_keyset(&self, block: u64, keyset: impl Into<Bytes>) -> B256 {
        let keyset = keyset.into();
        let hash = content_hash(&keyset);
        let mut state = self.state();
        state.head = state.head.max(block);
        state.keysets.insert(hash, (block, keyset));
        hash
    }
}

#[async_trait]
impl BridgeContract for InMemoryBridge {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state().head)
    }

    async fn subscribe_batch_data(
        &self,
        from_block: Option<u64>,
    ) -> Result<BatchDataSubscription, ChainError> {
        let start = match from_block {
            Some(block) => block,
            None => self.state().head,
        };

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (state, posted, token) = (self.state.clone(), self.posted.clone(), cancel.clone());

        tokio::spawn(async move {
            let mut next = 0;
            loop {
                let notified = posted.notified();
                let pending = {
                    let state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    let pending = state.events[next..]
                        .iter()
                        .filter(|event| event.block_number >= start)
                        .cloned()
                        .collect::<Vec<_>>();
                    next = state.events.len();
                    pending
                };

                for event in pending {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = notified => {}
                }
            }
        });

        Ok(BatchDataSubscription::new(rx, cancel))
    }

    async fn keyset_creation_block(&self, keyset_hash: B256) -> Result<u64, ChainError> {
        Ok(self.state().keysets.get(&keyset_hash).map_or(0, |(block, _)| *block))
    }

    async fn keysets_in_block(
        &self,
        keyset_hash: B256,
        block: u64,
    ) -> Result<Vec<Bytes>, ChainError> {
        Ok(self
            .state()
            .keysets
            .get(&keyset_hash)
            .filter(|(created, _)| *created == block)
            .map(|(_, keyset)| vec![keyset.clone()])
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_subscription_is_live() -> eyre::Result<()> {
        let bridge = InMemoryBridge::new();
        bridge.post_batch(1, vec![1u8]);
        bridge.post_batch(4, vec![4u8]);

        let mut sub = bridge.subscribe_batch_data(Some(2)).await?;
        assert_eq!(sub.recv().await?.block_number, 4);

        bridge.post_batch(6, vec![6u8]);
        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await??;
        assert_eq!(event, BatchDataEvent { block_number: 6, data: vec![6u8].into() });
        assert_eq!(bridge.block_number().await?, 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_keyset_lookup() -> eyre::Result<()> {
        let bridge = InMemoryBridge::new();
        let hash = bridge.register_keyset(3, vec![9u8; 20]);

        assert_eq!(bridge.keyset_creation_block(hash).await?, 3);
        assert_eq!(bridge.keysets_in_block(hash, 3).await?.len(), 1);
        assert!(bridge.keysets_in_block(hash, 2).await?.is_empty());
        assert_eq!(bridge.keyset_creation_block(B256::ZERO).await?, 0);
        Ok(())
    }
}
