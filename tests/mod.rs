use std::{sync::Arc, time::Duration};

use alloy::primitives::{Bytes, B256, U64};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blst::min_pk::Signature as BlsSignature;
use jsonrpsee::http_client::HttpClientBuilder;
use reqwest::{header::CACHE_CONTROL, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod utils;
use utils::spin_up_node;

use das_node::{
    content_hash, new_syncing_fallback_storage_service, now_unix,
    server::{DasApiClient, RestResponse, StoreResult, CACHE_CONTROL_VALUE},
    DataAvailabilityCertificate, DataAvailabilityReader, ExpirationPolicy, FallbackConfig,
    FallbackStorageService, InMemoryBridge, InMemoryStorageService, RestfulDasClient,
    StorageError, StorageService, SyncToStorageConfig, BATCH_HEADER_LEN,
};

#[tokio::test]
async fn test_store_then_get_by_hash_over_rest() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let node = spin_up_node(Arc::new(InMemoryStorageService::new())).await?;
    info!(rpc = %node.rpc.local_addr(), rest = %node.rest.local_addr(), "Node listening");

    let rpc = HttpClientBuilder::default().build(node.rpc_url())?;
    let timeout = now_unix() + 3600;
    let result = rpc.store(Bytes::from_static(b"hello"), U64::from(timeout), Bytes::new()).await?;

    let hash = content_hash(b"hello");
    assert_eq!(result.data_hash.as_ref(), hash.as_slice());
    assert_eq!(result.keyset_hash.as_ref(), node.keyset_hash.as_slice());

    let http = reqwest::Client::new();
    let url = node.rest_url().join(&format!("/get-by-hash/{hash}"))?;
    let response = http.get(url).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_CONTROL], CACHE_CONTROL_VALUE);
    let body: RestResponse = response.json().await?;
    assert_eq!(body.data, Some(STANDARD.encode(b"hello")));

    let short_hash = hex::encode(&hash[..31]);
    let short = node.rest_url().join(&format!("/get-by-hash/{short_hash}"))?;
    assert_eq!(http.get(short).send().await?.status(), StatusCode::BAD_REQUEST);

    let unknown = node.rest_url().join(&format!("/get-by-hash/{}", B256::repeat_byte(0x42)))?;
    assert_eq!(http.get(unknown).send().await?.status(), StatusCode::NOT_FOUND);

    node.cancel.cancel();
    node.rpc.stopped().await?;
    node.rest.stopped().await?;
    Ok(())
}

#[tokio::test]
async fn test_rest_mirror_reader() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let storage = Arc::new(InMemoryStorageService::new());
    storage.put(Bytes::from_static(b"mirrored"), u64::MAX).await?;
    let node = spin_up_node(storage).await?;

    let mirror = RestfulDasClient::new(node.rest_url());
    mirror.health_check().await?;
    assert_eq!(mirror.expiration_policy().await?, ExpirationPolicy::DiscardAfterDataTimeout);
    assert_eq!(
        mirror.get_by_hash(content_hash(b"mirrored")).await?,
        Bytes::from_static(b"mirrored")
    );
    let missing = mirror.get_by_hash(B256::repeat_byte(0x42)).await;
    assert!(matches!(missing, Err(StorageError::NotFound)));

    node.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn test_fallback_to_remote_node() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let remote_storage = Arc::new(InMemoryStorageService::new());
    remote_storage.put(Bytes::from_static(b"only remote"), u64::MAX).await?;
    let remote = spin_up_node(remote_storage).await?;

    let primary = Arc::new(InMemoryStorageService::new());
    let config = FallbackConfig { backup_retention_seconds: 600, ..Default::default() };
    let fallback = Arc::new(FallbackStorageService::new(
        primary.clone(),
        RestfulDasClient::new(remote.rest_url()),
        config,
    ));
    let local = spin_up_node(fallback).await?;

    let hash = content_hash(b"only remote");
    let url = local.rest_url().join(&format!("/get-by-hash/{hash}"))?;
    let body: RestResponse = reqwest::get(url).await?.json().await?;
    assert_eq!(body.data, Some(STANDARD.encode(b"only remote")));

    // copied into the local primary with the retention window
    assert_eq!(primary.get_by_hash(hash).await?, Bytes::from_static(b"only remote"));
    let expiration = primary.expiration_of(&hash).await.unwrap_or_default();
    assert!(expiration > now_unix() && expiration <= now_unix() + 600);

    remote.cancel.cancel();
    local.cancel.cancel();
    Ok(())
}

fn batch_from_store_result(result: &StoreResult, max_timestamp: u64) -> eyre::Result<Vec<u8>> {
    let cert = DataAvailabilityCertificate {
        keyset_hash: B256::from_slice(&result.keyset_hash),
        data_hash: B256::from_slice(&result.data_hash),
        timeout: result.timeout.to(),
        signers_mask: result.signers_mask.to(),
        sig: BlsSignature::from_bytes(&result.sig)
            .map_err(|e| eyre::eyre!("bad signature: {e:?}"))?,
        version: 0,
    };

    let mut batch = vec![0u8; BATCH_HEADER_LEN];
    batch[8..16].copy_from_slice(&max_timestamp.to_be_bytes());
    batch.extend_from_slice(&cert.serialize());
    Ok(batch)
}

#[tokio::test]
async fn test_eager_sync_from_remote_node() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let remote = spin_up_node(Arc::new(InMemoryStorageService::new())).await?;
    let rpc = HttpClientBuilder::default().build(remote.rpc_url())?;

    let timeout = U64::from(now_unix() + 8 * 24 * 60 * 60);
    let bridge = InMemoryBridge::new();
    for (block, payload) in [(10, &b"first batch"[..]), (12, &b"second batch"[..])] {
        let result = rpc.store(Bytes::copy_from_slice(payload), timeout, Bytes::new()).await?;
        bridge.post_batch(block, batch_from_store_result(&result, now_unix())?);
    }

    let primary = Arc::new(InMemoryStorageService::new());
    let sync = SyncToStorageConfig {
        eager: true,
        eager_stops_when_caught_up: true,
        eager_lower_bound_block: Some(0),
        ..Default::default()
    };
    let cancel = CancellationToken::new();
    let _service = new_syncing_fallback_storage_service(
        primary.clone(),
        Arc::new(RestfulDasClient::new(remote.rest_url())),
        FallbackConfig::default(),
        bridge,
        &sync,
        cancel.clone(),
    );

    tokio::time::timeout(Duration::from_secs(10), async {
        while primary.len().await < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;

    assert!(primary.get_by_hash(remote.keyset_hash).await.is_ok());
    for payload in [&b"first batch"[..], &b"second batch"[..]] {
        let hash = content_hash(payload);
        assert_eq!(primary.get_by_hash(hash).await?, Bytes::copy_from_slice(payload));
        assert_eq!(primary.expiration_of(&hash).await, Some(u64::MAX));
    }

    cancel.cancel();
    remote.cancel.cancel();
    Ok(())
}
