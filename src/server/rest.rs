use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};

use alloy::primitives::B256;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    RestResponse, RunningServer, CACHE_CONTROL_VALUE, EXPIRATION_POLICY_PATH, GET_BY_HASH_PATH,
    HEALTH_PATH,
};
use crate::{
    common::{decode_storage_key, StorageError, HASH_LEN},
    storage::DataAvailabilityReader,
};

/// How long in-flight requests may take to complete after shutdown was requested.
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

type Reader = Arc<dyn DataAvailabilityReader>;

/// Builds the REST router serving `reader`.
pub fn rest_router(reader: Reader) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(EXPIRATION_POLICY_PATH, get(expiration_policy))
        .route(&format!("{GET_BY_HASH_PATH}:hash"), get(get_by_hash))
        .fallback(unknown_path)
        .with_state(reader)
}

/// Serves `reader` over REST on `addr` until `cancel` fires. In-flight requests get
/// `grace_period` to complete before they are abandoned.
pub async fn start_rest_server(
    addr: SocketAddr,
    reader: Reader,
    cancel: CancellationToken,
    grace_period: Duration,
) -> eyre::Result<RunningServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    info!("REST server running on {local_addr}");

    let serve = axum::serve(listener, rest_router(reader))
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();

    let task = tokio::spawn(async move {
        tokio::pin!(serve);
        let result = tokio::select! {
            result = &mut serve => result,
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(grace_period).await;
            } => {
                warn!(?grace_period, "Abandoning in-flight REST requests");
                Ok(())
            }
        };

        match &result {
            Ok(()) => info!("REST server stopped"),
            Err(err) => warn!(?err, "REST server error"),
        }
        result
    });

    Ok(RunningServer::new(local_addr, task))
}

async fn unknown_path(uri: Uri) -> StatusCode {
    warn!(path = %uri.path(), "Unknown request path");
    StatusCode::BAD_REQUEST
}

async fn health(State(reader): State<Reader>) -> StatusCode {
    match reader.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            warn!(%err, "Unhealthy service");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn expiration_policy(
    State(reader): State<Reader>,
) -> Result<Json<RestResponse>, StatusCode> {
    let policy = reader.expiration_policy().await.map_err(|err| {
        warn!(%err, "Error retrieving expiration policy");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(RestResponse { expiration_policy: Some(policy.to_string()), ..Default::default() }))
}

#[tracing::instrument(skip(reader))]
async fn get_by_hash(
    State(reader): State<Reader>,
    Path(hash): Path<String>,
) -> Result<Response, StatusCode> {
    let key = decode_storage_key(&hash).map_err(|err| {
        debug!(%err, "Failed to decode hex-encoded hash");
        StatusCode::BAD_REQUEST
    })?;
    if key.len() < HASH_LEN {
        debug!(len = key.len(), "Decoded hash was too short");
        return Err(StatusCode::BAD_REQUEST);
    }

    let data = match reader.get_by_hash(B256::from_slice(&key[..HASH_LEN])).await {
        Ok(data) => data,
        Err(StorageError::NotFound) => return Err(StatusCode::NOT_FOUND),
        Err(err) => {
            warn!(%err, "Unable to read data");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    trace!(len = data.len(), "Returning data");

    let body = RestResponse { data: Some(STANDARD.encode(&data)), ..Default::default() };
    Ok(([(header::CACHE_CONTROL, CACHE_CONTROL_VALUE)], Json(body)).into_response())
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Bytes;
    use axum::body::Body;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        common::{content_hash, ExpirationPolicy},
        storage::{InMemoryStorageService, StorageService},
    };

    async fn call(router: Router, path: &str) -> eyre::Result<Response> {
        let request = axum::http::Request::get(path).body(Body::empty())?;
        Ok(router.oneshot(request).await?)
    }

    async fn json(response: Response) -> eyre::Result<RestResponse> {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    #[tokio::test]
    async fn test_get_by_hash() -> eyre::Result<()> {
        let storage = Arc::new(InMemoryStorageService::new());
        storage.put(Bytes::from_static(b"hello"), u64::MAX).await?;
        let router = rest_router(storage);

        let hash = content_hash(b"hello");
        let response = call(router.clone(), &format!("/get-by-hash/{hash}")).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], CACHE_CONTROL_VALUE);
        assert_eq!(json(response).await?.data.as_deref(), Some("aGVsbG8="));

        // unprefixed hex and trailing bytes are accepted
        let long = format!("/get-by-hash/{}00ff", hex::encode(hash));
        assert_eq!(call(router.clone(), &long).await?.status(), StatusCode::OK);

        let short = format!("/get-by-hash/{}", hex::encode(&hash[..31]));
        assert_eq!(call(router.clone(), &short).await?.status(), StatusCode::BAD_REQUEST);
        let malformed = call(router.clone(), "/get-by-hash/zz").await?;
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let unknown = format!("/get-by-hash/{}", B256::repeat_byte(7));
        let response = call(router, &unknown).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::CACHE_CONTROL).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_health_and_policy() -> eyre::Result<()> {
        let router = rest_router(Arc::new(InMemoryStorageService::new()));

        assert_eq!(call(router.clone(), HEALTH_PATH).await?.status(), StatusCode::OK);
        assert_eq!(call(router.clone(), "/nope").await?.status(), StatusCode::BAD_REQUEST);

        let response = call(router, EXPIRATION_POLICY_PATH).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await?;
        assert_eq!(
            body.expiration_policy.as_deref(),
            Some(ExpirationPolicy::DiscardAfterDataTimeout.as_str())
        );
        assert_eq!(body.data, None);
        Ok(())
    }
}
