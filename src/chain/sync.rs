use clap::{ArgAction, Args};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    recover_payload_from_batch, BatchDataEvent, BridgeContract, ChainFetchReader, Preimages,
    RecoveryError,
};
use crate::{
    common::{expiry_from_now, ChainError, StorageError},
    primitives::is_das_batch,
    storage::{
        DataAvailabilityReader, FallbackConfig, FallbackStorageService, LogOnWriteError,
        StorageService,
    },
};

/// Options for syncing batch data from L1 into local storage.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SyncToStorageConfig {
    /// Eagerly sync batch data to this DAS's storage from the backup, using L1 as the index of
    /// batch data hashes; otherwise only sync lazily on missed reads.
    #[clap(long = "sync.eager", env = "DAS_SYNC_EAGER")]
    pub eager: bool,
    /// Stop the eager sync as soon as it is caught up with the L1 head.
    #[clap(long = "sync.eager-stops-when-caught-up", env = "DAS_SYNC_STOPS_WHEN_CAUGHT_UP")]
    pub eager_stops_when_caught_up: bool,
    /// When eagerly syncing, start indexing forward from this L1 block. Defaults to the head.
    #[clap(long = "sync.eager-lower-bound-block", env = "DAS_SYNC_LOWER_BOUND_BLOCK")]
    pub eager_lower_bound_block: Option<u64>,
    /// Seconds to retain synced data. Defaults to forever.
    #[clap(
        long = "sync.retention-period",
        env = "DAS_SYNC_RETENTION_PERIOD",
        default_value_t = u64::MAX
    )]
    pub retention_period: u64,
    /// Only log failures to write synced data; otherwise they stop the sync.
    #[clap(
        long = "sync.ignore-write-errors",
        env = "DAS_SYNC_IGNORE_WRITE_ERRORS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub ignore_write_errors: bool,
}

impl Default for SyncToStorageConfig {
    fn default() -> Self {
        Self {
            eager: false,
            eager_stops_when_caught_up: false,
            eager_lower_bound_block: None,
            retention_period: u64::MAX,
            ignore_write_errors: true,
        }
    }
}

/// An error that ends a synchronizer run.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("batch recovery failed: {0}")]
    Recovery(#[from] RecoveryError),
    #[error("synchronization cancelled")]
    Cancelled,
}

/// Progress of a synchronizer within the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCursor {
    /// Block of the last fully processed event.
    pub last_processed_block: Option<u64>,
    /// Whether an event at or past the observed head has been processed.
    pub caught_up: bool,
    /// Number of preimages written so far.
    pub preimages_written: u64,
}

/// Watches the bridge contract for batch data and backfills every referenced preimage missing
/// from the target storage.
///
/// Events are processed strictly in chain order, and a batch is fully backfilled before the
/// next event is received. Any storage or chain error aborts the run; tolerating write errors
/// is left to the target (see [`LogOnWriteError`]).
#[derive(Debug)]
pub struct ChainSynchronizer<S, R, C> {
    sync_to: S,
    data_source: ChainFetchReader<R, C>,
    bridge: C,
    lower_bound_block: Option<u64>,
    expiration_time: u64,
    stop_when_caught_up: bool,
    cursor: SyncCursor,
}

impl<S, R, C> ChainSynchronizer<S, R, C>
where
    S: StorageService,
    R: DataAvailabilityReader,
    C: BridgeContract + Clone,
{
    /// Creates a synchronizer writing into `sync_to`. Keysets missing from `data_source` are
    /// fetched from the bridge contract. Backfilled data expires `expiration_time` seconds
    /// after it is written (`u64::MAX` never expires).
    pub fn new(
        sync_to: S,
        data_source: R,
        bridge: C,
        lower_bound_block: Option<u64>,
        expiration_time: u64,
        stop_when_caught_up: bool,
    ) -> Self {
        Self {
            sync_to,
            data_source: ChainFetchReader::new(data_source, bridge.clone()),
            bridge,
            lower_bound_block,
            expiration_time,
            stop_when_caught_up,
            cursor: SyncCursor::default(),
        }
    }

    /// The progress made so far.
    pub fn cursor(&self) -> SyncCursor {
        self.cursor
    }

    /// The storage being synced into.
    pub fn target(&self) -> &S {
        &self.sync_to
    }

    /// Runs until cancelled, until an error occurs or, if configured to stop when caught up,
    /// until an event at or past the chain head has been processed.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut subscription = self.bridge.subscribe_batch_data(self.lower_bound_block).await?;
        let mut latest_block = self.bridge.block_number().await?;

        info!(
            from = ?self.lower_bound_block,
            head = latest_block,
            stop_when_caught_up = self.stop_when_caught_up,
            "Syncing batch data from chain"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    subscription.unsubscribe();
                    info!(cursor = ?self.cursor, "Chain sync cancelled");
                    return Err(SyncError::Cancelled);
                }
                event = subscription.recv() => event?,
            };

            self.process_event(&event).await?;
            self.cursor.last_processed_block = Some(event.block_number);

            if event.block_number >= latest_block && !self.cursor.caught_up {
                self.cursor.caught_up = true;
                info!(
                    block = event.block_number,
                    written = self.cursor.preimages_written,
                    "Chain sync caught up"
                );
            }

            if self.stop_when_caught_up {
                if event.block_number >= latest_block {
                    return Ok(self.sync_to.sync().await?);
                }
                latest_block = self.bridge.block_number().await?;
            }
        }
    }

    /// Backfills all preimages of a single batch.
    async fn process_event(&mut self, event: &BatchDataEvent) -> Result<(), SyncError> {
        if !is_das_batch(&event.data) {
            trace!(block = event.block_number, "Skipping non-DAS batch");
            return Ok(());
        }

        let mut preimages = Preimages::new();
        recover_payload_from_batch(&event.data, &self.data_source, &mut preimages).await?;

        let expiration = expiry_from_now(self.expiration_time);
        let mut written = 0u64;
        for (hash, contents) in preimages {
            match self.sync_to.get_by_hash(hash).await {
                Ok(_) => {}
                Err(StorageError::NotFound) => {
                    self.sync_to.put(contents, expiration).await?;
                    written += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.cursor.preimages_written += written;
        debug!(block = event.block_number, written, "Processed batch");
        Ok(())
    }
}

/// Creates a fallback storage service over `primary` and `backup`, and, if the config asks
/// for eager syncing, spawns a synchronizer that fills `primary` from `backup` using the bridge
/// contract as the index. The synchronizer stops when `cancel` fires; its errors are logged.
pub fn new_syncing_fallback_storage_service<P, B, C>(
    primary: P,
    backup: B,
    fallback: FallbackConfig,
    bridge: C,
    sync: &SyncToStorageConfig,
    cancel: CancellationToken,
) -> FallbackStorageService<P, B>
where
    P: StorageService + Clone + 'static,
    B: DataAvailabilityReader + Clone + 'static,
    C: BridgeContract + Clone + 'static,
{
    if sync.eager {
        let (lower_bound, expiration, stop) = (
            sync.eager_lower_bound_block,
            sync.retention_period,
            sync.eager_stops_when_caught_up,
        );

        if sync.ignore_write_errors {
            let target = LogOnWriteError::new(primary.clone());
            let synchronizer = ChainSynchronizer::new(
                target,
                backup.clone(),
                bridge,
                lower_bound,
                expiration,
                stop,
            );
            spawn_synchronizer(synchronizer, cancel);
        } else {
            let synchronizer = ChainSynchronizer::new(
                primary.clone(),
                backup.clone(),
                bridge,
                lower_bound,
                expiration,
                stop,
            );
            spawn_synchronizer(synchronizer, cancel);
        }
    }

    FallbackStorageService::new(primary, backup, fallback)
}

fn spawn_synchronizer<S, R, C>(
    mut synchronizer: ChainSynchronizer<S, R, C>,
    cancel: CancellationToken,
) where
    S: StorageService + 'static,
    R: DataAvailabilityReader + 'static,
    C: BridgeContract + Clone + 'static,
{
    tokio::spawn(async move {
        match synchronizer.run(cancel).await {
            Ok(()) | Err(SyncError::Cancelled) => {}
            Err(err) => warn!(%err, "Error syncing storage from chain"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use alloy::primitives::{Bytes, B256};
    use async_trait::async_trait;
    use blst::min_pk::SecretKey as BlsSecretKey;

    use super::*;
    use crate::{
        bls::{random_bls_secret, sign_with_prefix},
        chain::{InMemoryBridge, MIN_CERT_LIFETIME_SECONDS},
        common::{content_hash, now_unix, ExpirationPolicy},
        primitives::{signable_fields, DataAvailabilityCertificate, Keyset, BATCH_HEADER_LEN},
        storage::InMemoryStorageService,
    };

    #[derive(Debug, Default)]
    struct CountingStore {
        inner: InMemoryStorageService,
        puts: AtomicUsize,
        syncs: AtomicUsize,
        fail_writes: bool,
    }

    impl CountingStore {
        fn failing() -> Self {
            Self { fail_writes: true, ..Default::default() }
        }

        fn puts(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        fn syncs(&self) -> usize {
            self.syncs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataAvailabilityReader for CountingStore {
        async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
            self.inner.get_by_hash(hash).await
        }

        async fn health_check(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
            self.inner.expiration_policy().await
        }
    }

    #[async_trait]
    impl StorageService for CountingStore {
        async fn put(&self, data: Bytes, expiration: u64) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::WriteFailed("disk full".into()));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(data, expiration).await
        }

        async fn sync(&self) -> Result<(), StorageError> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Committee {
        sk: BlsSecretKey,
        keyset: Keyset,
    }

    impl Committee {
        fn new() -> eyre::Result<Self> {
            let sk = random_bls_secret();
            let keyset = Keyset::new(1, vec![sk.sk_to_pk()])?;
            Ok(Self { sk, keyset })
        }

        /// A DAS batch committing to `payload` with a flat (version 0) certificate.
        fn batch(&self, payload: &[u8]) -> Vec<u8> {
            let data_hash = content_hash(payload);
            let timeout = now_unix() + MIN_CERT_LIFETIME_SECONDS + 3600;
            let cert = DataAvailabilityCertificate {
                keyset_hash: self.keyset.hash(),
                data_hash,
                timeout,
                signers_mask: 1,
                sig: sign_with_prefix(&self.sk, signable_fields(data_hash, timeout, 1)),
                version: 0,
            };

            let mut batch = vec![0u8; BATCH_HEADER_LEN];
            batch[8..16].copy_from_slice(&now_unix().to_be_bytes());
            batch.extend_from_slice(&cert.serialize());
            batch
        }
    }

    /// A backup holding the committee keyset and the given payloads.
    async fn backup_with(
        committee: &Committee,
        payloads: &[&[u8]],
    ) -> eyre::Result<Arc<InMemoryStorageService>> {
        let backup = Arc::new(InMemoryStorageService::new());
        backup.put(committee.keyset.serialize(), u64::MAX).await?;
        for payload in payloads {
            backup.put(Bytes::copy_from_slice(payload), u64::MAX).await?;
        }
        Ok(backup)
    }

    #[tokio::test]
    async fn test_catch_up_sync_is_idempotent() -> eyre::Result<()> {
        let _ = tracing_subscriber::fmt::try_init();

        let committee = Committee::new()?;
        let backup = backup_with(&committee, &[b"first", b"second"]).await?;
        let bridge = InMemoryBridge::new();
        bridge.post_batch(3, committee.batch(b"first"));
        bridge.post_batch(7, committee.batch(b"second"));

        let target = Arc::new(CountingStore::default());
        let mut sync = ChainSynchronizer::new(
            target.clone(),
            backup.clone(),
            bridge.clone(),
            Some(0),
            60,
            true,
        );
        sync.run(CancellationToken::new()).await?;

        // keyset + two payloads
        assert_eq!(target.puts(), 3);
        assert_eq!(target.syncs(), 1);
        assert_eq!(sync.cursor().last_processed_block, Some(7));
        assert!(sync.cursor().caught_up);
        let second = target.get_by_hash(content_hash(b"second")).await?;
        assert_eq!(second, Bytes::from_static(b"second"));

        let expiration = target.inner.expiration_of(&content_hash(b"first")).await;
        assert!(expiration.is_some_and(|exp| exp <= now_unix() + 60));

        let mut again = ChainSynchronizer::new(target.clone(), backup, bridge, Some(0), 60, true);
        again.run(CancellationToken::new()).await?;
        assert_eq!(target.puts(), 3, "replay must not write");
        assert_eq!(target.syncs(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_lower_bound_skips_earlier_batches() -> eyre::Result<()> {
        let committee = Committee::new()?;
        let backup = backup_with(&committee, &[b"old", b"new"]).await?;
        let bridge = InMemoryBridge::new();
        bridge.post_batch(2, committee.batch(b"old"));
        bridge.post_batch(9, committee.batch(b"new"));

        let target = Arc::new(CountingStore::default());
        ChainSynchronizer::new(target.clone(), backup, bridge, Some(5), u64::MAX, true)
            .run(CancellationToken::new())
            .await?;

        assert!(target.get_by_hash(content_hash(b"old")).await.is_err());
        assert_eq!(target.inner.expiration_of(&content_hash(b"new")).await, Some(u64::MAX));
        Ok(())
    }

    #[tokio::test]
    async fn test_non_das_batches_are_skipped() -> eyre::Result<()> {
        let committee = Committee::new()?;
        let backup = backup_with(&committee, &[]).await?;
        let bridge = InMemoryBridge::new();

        let mut plain = vec![0u8; BATCH_HEADER_LEN];
        plain.extend_from_slice(&[0x00, 1, 2, 3]);
        bridge.post_batch(4, plain);

        let target = Arc::new(CountingStore::default());
        let mut sync = ChainSynchronizer::new(target.clone(), backup, bridge, Some(0), 60, true);
        sync.run(CancellationToken::new()).await?;

        assert_eq!(target.puts(), 0);
        assert_eq!(target.syncs(), 1);
        assert_eq!(sync.cursor().last_processed_block, Some(4));
        Ok(())
    }

    #[tokio::test]
    async fn test_keyset_is_fetched_from_chain() -> eyre::Result<()> {
        let committee = Committee::new()?;
        let backup = Arc::new(InMemoryStorageService::new());
        backup.put(Bytes::from_static(b"payload"), u64::MAX).await?;

        let bridge = InMemoryBridge::new();
        bridge.register_keyset(1, committee.keyset.serialize());
        bridge.post_batch(2, committee.batch(b"payload"));

        let target = Arc::new(CountingStore::default());
        ChainSynchronizer::new(target.clone(), backup, bridge, Some(0), 60, true)
            .run(CancellationToken::new())
            .await?;

        let keyset = target.get_by_hash(committee.keyset.hash()).await?;
        assert_eq!(keyset, committee.keyset.serialize());
        assert_eq!(target.puts(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_failure_aborts() -> eyre::Result<()> {
        let committee = Committee::new()?;
        let backup = backup_with(&committee, &[b"data"]).await?;
        let bridge = InMemoryBridge::new();
        bridge.post_batch(1, committee.batch(b"data"));

        let target = Arc::new(CountingStore::failing());
        let (source, chain) = (backup.clone(), bridge.clone());
        let mut sync = ChainSynchronizer::new(target.clone(), source, chain, Some(0), 60, true);
        let err = sync.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(StorageError::WriteFailed(_))));
        assert_eq!(target.syncs(), 0);

        // tolerated when the target only logs write errors
        let tolerant = LogOnWriteError::new(target.clone());
        ChainSynchronizer::new(tolerant, backup, bridge, Some(0), 60, true)
            .run(CancellationToken::new())
            .await?;
        assert_eq!(target.syncs(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_payload_aborts() -> eyre::Result<()> {
        let committee = Committee::new()?;
        let backup = backup_with(&committee, &[]).await?;
        let bridge = InMemoryBridge::new();
        bridge.post_batch(1, committee.batch(b"lost"));

        let target = Arc::new(CountingStore::default());
        let err = ChainSynchronizer::new(target.clone(), backup, bridge, Some(0), 60, true)
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Recovery(RecoveryError::Payload(StorageError::NotFound))
        ));
        assert_eq!(target.puts(), 0, "no partial batch");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation() -> eyre::Result<()> {
        let committee = Committee::new()?;
        let backup = backup_with(&committee, &[b"live"]).await?;
        let bridge = InMemoryBridge::new();
        bridge.set_head(10);

        let target = Arc::new(CountingStore::default());
        let cancel = CancellationToken::new();
        let mut sync =
            ChainSynchronizer::new(target.clone(), backup, bridge.clone(), None, 60, false);
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { sync.run(cancel).await }
        });

        bridge.post_batch(11, committee.batch(b"live"));
        tokio::time::timeout(Duration::from_secs(5), async {
            while target.get_by_hash(content_hash(b"live")).await.is_err() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;

        cancel.cancel();
        let result = handle.await?;
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(target.syncs(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_syncing_fallback_service() -> eyre::Result<()> {
        let committee = Committee::new()?;
        let backup = backup_with(&committee, &[b"eager"]).await?;
        let bridge = InMemoryBridge::new();
        bridge.post_batch(5, committee.batch(b"eager"));

        let primary = Arc::new(InMemoryStorageService::new());
        let config = SyncToStorageConfig {
            eager: true,
            eager_stops_when_caught_up: true,
            eager_lower_bound_block: Some(0),
            ..Default::default()
        };
        let service = new_syncing_fallback_storage_service(
            primary.clone(),
            backup,
            FallbackConfig::default(),
            bridge,
            &config,
            CancellationToken::new(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while primary.get_by_hash(content_hash(b"eager")).await.is_err() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;

        let synced = service.get_by_hash(content_hash(b"eager")).await?;
        assert_eq!(synced, Bytes::from_static(b"eager"));
        assert_eq!(primary.expiration_of(&content_hash(b"eager")).await, Some(u64::MAX));
        Ok(())
    }
}
