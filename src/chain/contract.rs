use std::time::Duration;

use alloy::{
    primitives::{Address, Bytes, B256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log},
    sol,
    sol_types::SolEvent,
    transports::http::Http,
};
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use super::{BatchDataEvent, BatchDataSubscription, BridgeContract};
use crate::common::ChainError;

use ISequencerInbox::{ISequencerInboxInstance, SequencerBatchData, SetValidKeyset};

/// Maximum number of blocks covered by a single `eth_getLogs` query.
const MAX_BLOCK_RANGE: u64 = 1_000;

/// Buffered events per subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

/// The sequencer inbox (bridge) contract, accessed over HTTP.
#[derive(Debug, Clone)]
pub struct SequencerInbox {
    contract: ISequencerInboxInstance<Http<Client>, RootProvider<Http<Client>>>,
    provider: RootProvider<Http<Client>>,
    address: Address,
    poll_interval: Duration,
}

impl SequencerInbox {
    /// Creates a new `SequencerInbox` instance with the given execution client URL and contract
    /// address.
    pub fn new<U: Into<Url>>(execution_client_url: U, address: Address) -> Self {
        let provider = ProviderBuilder::new().on_http(execution_client_url.into());
        let contract = ISequencerInbox::new(address, provider.clone());

        Self { contract, provider, address, poll_interval: Duration::from_secs(12) }
    }

    /// Sets how often the head is polled for new events once caught up.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The contract address.
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl BridgeContract for SequencerInbox {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn subscribe_batch_data(
        &self,
        from_block: Option<u64>,
    ) -> Result<BatchDataSubscription, ChainError> {
        let start = match from_block {
            Some(block) => block,
            None => self.block_number().await?,
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();

        tokio::spawn(poll_batch_data(
            self.provider.clone(),
            self.address,
            start,
            self.poll_interval,
            tx,
            cancel.clone(),
        ));

        Ok(BatchDataSubscription::new(rx, cancel))
    }

    async fn keyset_creation_block(&self, keyset_hash: B256) -> Result<u64, ChainError> {
        let block = self.contract.getKeysetCreationBlock(keyset_hash).call().await?._0;
        u64::try_from(block).map_err(|_| ChainError::BlockNumberOverflow)
    }

    async fn keysets_in_block(
        &self,
        keyset_hash: B256,
        block: u64,
    ) -> Result<Vec<Bytes>, ChainError> {
        let filter = Filter::new()
            .address(self.address)
            .event_signature(SetValidKeyset::SIGNATURE_HASH)
            .topic1(keyset_hash)
            .from_block(block)
            .to_block(block);

        self.provider
            .get_logs(&filter)
            .await?
            .iter()
            .map(|log| {
                SetValidKeyset::decode_log_data(log.data(), true)
                    .map(|event| event.keysetBytes)
                    .map_err(|e| ChainError::Decode(e.to_string()))
            })
            .collect()
    }
}

/// Polls `eth_getLogs` for batch data events from `next_block` on, forwarding them in chain
/// order until cancelled, the receiver is dropped, or an error is hit. Errors are forwarded
/// before the task exits.
async fn poll_batch_data(
    provider: RootProvider<Http<Client>>,
    address: Address,
    mut next_block: u64,
    poll_interval: Duration,
    tx: mpsc::Sender<Result<BatchDataEvent, ChainError>>,
    cancel: CancellationToken,
) {
    loop {
        let head = tokio::select! {
            _ = cancel.cancelled() => return,
            head = provider.get_block_number() => head,
        };
        let head = match head {
            Ok(head) => head,
            Err(err) => {
                let _ = tx.send(Err(err.into())).await;
                return;
            }
        };

        if next_block > head {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(poll_interval) => continue,
            }
        }

        let to_block = head.min(next_block.saturating_add(MAX_BLOCK_RANGE - 1));
        let filter = Filter::new()
            .address(address)
            .event_signature(SequencerBatchData::SIGNATURE_HASH)
            .from_block(next_block)
            .to_block(to_block);

        let logs = tokio::select! {
            _ = cancel.cancelled() => return,
            logs = provider.get_logs(&filter) => logs,
        };
        let logs = match logs {
            Ok(logs) => logs,
            Err(err) => {
                warn!(%err, next_block, to_block, "Failed to fetch batch data logs");
                let _ = tx.send(Err(err.into())).await;
                return;
            }
        };
        trace!(from = next_block, to = to_block, count = logs.len(), "Fetched batch data logs");

        for log in logs {
            let event = decode_batch_data(&log);
            let failed = event.is_err();
            if tx.send(event).await.is_err() {
                debug!("Batch data subscriber dropped");
                return;
            }
            if failed {
                return;
            }
        }

        next_block = to_block + 1;
    }
}

fn decode_batch_data(log: &Log) -> Result<BatchDataEvent, ChainError> {
    let block_number =
        log.block_number.ok_or_else(|| ChainError::Decode("log without block number".into()))?;
    let event = SequencerBatchData::decode_log_data(log.data(), true)
        .map_err(|e| ChainError::Decode(e.to_string()))?;

    Ok(BatchDataEvent { block_number, data: event.data })
}

sol! {
    #[sol(rpc)]
    interface ISequencerInbox {
        event SequencerBatchData(uint256 indexed batchSequenceNumber, bytes data);
        event SetValidKeyset(bytes32 indexed keysetHash, bytes keysetBytes);

        function getKeysetCreationBlock(bytes32 ksHash) external view returns (uint256);
    }
}
