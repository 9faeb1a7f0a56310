use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::DataAvailabilityReader;
use crate::{
    common::{content_hash, ExpirationPolicy, InvalidExpirationPolicy, StorageError},
    server::{RestResponse, EXPIRATION_POLICY_PATH, GET_BY_HASH_PATH, HEALTH_PATH},
};

/// A read-only mirror of another node, accessed over its REST surface.
#[derive(Debug, Clone)]
pub struct RestfulDasClient {
    client: Client,
    url: Url,
}

impl RestfulDasClient {
    /// Creates a new client for the REST server at `url`. The server may be mounted below a
    /// base path, such as `http://host/das/`.
    pub fn new(mut url: Url) -> Self {
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Self { client: Client::new(), url }
    }

    /// Resolves `path` below the base URL.
    fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
        self.url
            .join(path.trim_start_matches('/'))
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn get_json(&self, url: Url) -> Result<RestResponse, StorageError> {
        let response = self.client.get(url).send().await.map_err(backend)?;
        match response.status() {
            StatusCode::OK => response.json().await.map_err(backend),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound),
            status => Err(StorageError::Backend(format!("unexpected status {status}"))),
        }
    }
}

fn backend(err: reqwest::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl DataAvailabilityReader for RestfulDasClient {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
        let url = self.endpoint(&format!("{GET_BY_HASH_PATH}{}", hex::encode(hash)))?;
        let response = self.get_json(url).await?;

        let encoded = response.data.ok_or(StorageError::NotFound)?;
        let data = Bytes::from(
            STANDARD.decode(encoded).map_err(|e| StorageError::Backend(e.to_string()))?,
        );

        let actual = content_hash(&data);
        if actual != hash {
            return Err(StorageError::HashMismatch { expected: hash, actual });
        }

        debug!(len = data.len(), "Fetched from REST mirror");
        Ok(data)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let response =
            self.client.get(self.endpoint(HEALTH_PATH)?).send().await.map_err(backend)?;
        if !response.status().is_success() {
            return Err(StorageError::Backend(format!("unhealthy: {}", response.status())));
        }
        Ok(())
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
        let response = self.get_json(self.endpoint(EXPIRATION_POLICY_PATH)?).await?;
        response
            .expiration_policy
            .ok_or_else(|| StorageError::Backend("missing expiration policy".into()))?
            .parse()
            .map_err(|e: InvalidExpirationPolicy| StorageError::Backend(e.to_string()))
    }
}
