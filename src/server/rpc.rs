use std::{net::SocketAddr, time::Duration};

use alloy::primitives::{Bytes, B256, U64};
use jsonrpsee::{
    core::{async_trait, RpcResult},
    proc_macros::rpc,
    server::Server,
    types::{
        error::{INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE},
        ErrorObjectOwned,
    },
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use super::RunningServer;
use crate::{
    common::{StorageError, HASH_LEN},
    service::{DasError, DataAvailabilityService},
};

/// Error code returned when the requested hash is not stored.
pub const NOT_FOUND_CODE: i32 = -32001;

/// A stored message's certificate, as returned over RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResult {
    /// Content hash of the stored message.
    pub data_hash: Bytes,
    /// Expiry of the commitment, in UNIX seconds.
    pub timeout: U64,
    /// Members that signed.
    pub signers_mask: U64,
    /// Hash of the keyset the signature is checked against.
    pub keyset_hash: Bytes,
    /// Compressed BLS signature over the certificate's signable fields.
    pub sig: Bytes,
}

/// The `das` RPC namespace.
#[rpc(server, client, namespace = "das")]
pub trait DasApi {
    /// Stores `message` until `timeout` and returns a certificate over it.
    #[method(name = "store")]
    async fn store(&self, message: Bytes, timeout: U64, sig: Bytes) -> RpcResult<StoreResult>;

    /// Returns the preimage of a 32 byte hash.
    #[method(name = "getByHash")]
    async fn get_by_hash(&self, hash: Bytes) -> RpcResult<Bytes>;

    /// Fails if the service is unhealthy.
    #[method(name = "healthCheck")]
    async fn health_check(&self) -> RpcResult<()>;

    /// Returns the expiration policy of the backing storage.
    #[method(name = "expirationPolicy")]
    async fn expiration_policy(&self) -> RpcResult<String>;
}

/// Serves a [`DataAvailabilityService`] in the `das` namespace.
#[derive(Debug, Clone)]
pub struct DasRpc<D> {
    das: D,
}

impl<D> DasRpc<D> {
    /// Creates the RPC handler for `das`.
    pub const fn new(das: D) -> Self {
        Self { das }
    }
}

#[async_trait]
impl<D: DataAvailabilityService + 'static> DasApiServer for DasRpc<D> {
    async fn store(&self, message: Bytes, timeout: U64, sig: Bytes) -> RpcResult<StoreResult> {
        trace!(len = message.len(), %timeout, "das_store");
        let cert = self.das.store(message, timeout.to::<u64>(), sig).await.map_err(das_error)?;

        Ok(StoreResult {
            data_hash: Bytes::copy_from_slice(cert.data_hash.as_slice()),
            timeout: U64::from(cert.timeout),
            signers_mask: U64::from(cert.signers_mask),
            keyset_hash: Bytes::copy_from_slice(cert.keyset_hash.as_slice()),
            sig: Bytes::copy_from_slice(&cert.sig.to_bytes()),
        })
    }

    async fn get_by_hash(&self, hash: Bytes) -> RpcResult<Bytes> {
        if hash.len() != HASH_LEN {
            return Err(ErrorObjectOwned::owned(
                INVALID_PARAMS_CODE,
                format!("hash must be {HASH_LEN} bytes, got {}", hash.len()),
                None::<()>,
            ));
        }

        self.das.get_by_hash(B256::from_slice(&hash)).await.map_err(storage_error)
    }

    async fn health_check(&self) -> RpcResult<()> {
        self.das.health_check().await.map_err(storage_error)
    }

    async fn expiration_policy(&self) -> RpcResult<String> {
        let policy = self.das.expiration_policy().await.map_err(storage_error)?;
        Ok(policy.to_string())
    }
}

fn storage_error(err: StorageError) -> ErrorObjectOwned {
    match err {
        StorageError::NotFound => ErrorObjectOwned::owned(NOT_FOUND_CODE, "not found", None::<()>),
        err => {
            warn!(%err, "Storage error serving RPC request");
            ErrorObjectOwned::owned(INTERNAL_ERROR_CODE, "storage error", None::<()>)
        }
    }
}

fn das_error(err: DasError) -> ErrorObjectOwned {
    match err {
        DasError::Storage(err) => storage_error(err),
        err => ErrorObjectOwned::owned(INVALID_PARAMS_CODE, err.to_string(), None::<()>),
    }
}

/// Serves `das` over JSON-RPC (HTTP and WebSocket) on `addr` until `cancel` fires. In-flight
/// requests get `grace_period` to complete before they are abandoned.
pub async fn start_rpc_server<D>(
    addr: SocketAddr,
    das: D,
    cancel: CancellationToken,
    grace_period: Duration,
) -> eyre::Result<RunningServer>
where
    D: DataAvailabilityService + 'static,
{
    let server = Server::builder().build(addr).await?;
    let local_addr = server.local_addr()?;
    let handle = server.start(DasRpc::new(das).into_rpc());

    info!("RPC server running on {local_addr}");

    let task = tokio::spawn(async move {
        let stopped = handle.clone().stopped();
        tokio::pin!(stopped);

        tokio::select! {
            _ = &mut stopped => {}
            _ = async {
                cancel.cancelled().await;
                // already stopped if this fails
                let _ = handle.stop();
                tokio::time::sleep(grace_period).await;
            } => {
                warn!(?grace_period, "Abandoning in-flight RPC requests");
            }
        }
        info!("RPC server stopped");
        Ok(())
    });

    Ok(RunningServer::new(local_addr, task))
}
