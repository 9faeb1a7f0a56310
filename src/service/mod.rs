use std::fmt;

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use blst::min_pk::SecretKey as BlsSecretKey;
use thiserror::Error;
use tracing::debug;

mod spec;
pub use spec::DataAvailabilityService;

mod verifier;
pub use verifier::{
    sign_store_request, store_request_hash, StoreRequestVerifier, STORE_REQUEST_PREFIX,
};

use crate::{
    bls::sign_with_prefix,
    common::{content_hash, now_unix, ExpirationPolicy, StorageError},
    primitives::{signable_fields, DataAvailabilityCertificate, Keyset},
    storage::{DataAvailabilityReader, StorageService},
};

/// An error returned by a [`DataAvailabilityService`].
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DasError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid store request signature: {0}")]
    SignatureInvalid(String),
    #[error("timeout {timeout} is in the past (now {now})")]
    TimeoutInPast { timeout: u64, now: u64 },
    #[error("signing key is not a member of the keyset")]
    NotInKeyset,
}

/// A committee member that persists data to its storage before signing a certificate over it.
///
/// The signers mask of every certificate has only this member's bit set; aggregation across
/// the committee is up to the caller.
pub struct SignAfterStoreDas<S> {
    storage: S,
    secret_key: BlsSecretKey,
    keyset: Keyset,
    keyset_hash: B256,
    signers_mask: u64,
    verifier: Option<StoreRequestVerifier>,
}

impl<S> fmt::Debug for SignAfterStoreDas<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignAfterStoreDas")
            .field("keyset_hash", &self.keyset_hash)
            .field("signers_mask", &format_args!("{:#x}", self.signers_mask))
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl<S: StorageService> SignAfterStoreDas<S> {
    /// Creates a service signing with `secret_key`, whose public key must be in `keyset`.
    pub fn new(storage: S, secret_key: BlsSecretKey, keyset: Keyset) -> Result<Self, DasError> {
        let index = keyset.index_of(&secret_key.sk_to_pk()).ok_or(DasError::NotInKeyset)?;

        Ok(Self {
            storage,
            secret_key,
            keyset_hash: keyset.hash(),
            keyset,
            signers_mask: 1 << index,
            verifier: None,
        })
    }

    /// Creates a service that is the only member of its committee.
    pub fn single_member(storage: S, secret_key: BlsSecretKey) -> Result<Self, DasError> {
        let keyset = Keyset::new(1, vec![secret_key.sk_to_pk()])
            .map_err(|_| DasError::NotInKeyset)?;
        Self::new(storage, secret_key, keyset)
    }

    /// Only accept store requests signed by the given batch poster.
    pub fn with_verifier(mut self, verifier: StoreRequestVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// The keyset certificates are issued under.
    pub fn keyset(&self) -> &Keyset {
        &self.keyset
    }

    /// Hash of [`Self::keyset`].
    pub fn keyset_hash(&self) -> B256 {
        self.keyset_hash
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Stores the keyset preimage so that certificates can be verified from this node's data.
    pub async fn publish_keyset(&self) -> Result<(), StorageError> {
        self.storage.put(self.keyset.serialize(), u64::MAX).await?;
        self.storage.sync().await
    }
}

#[async_trait]
impl<S: StorageService> DataAvailabilityReader for SignAfterStoreDas<S> {
    async fn get_by_hash(&self, hash: B256) -> Result<Bytes, StorageError> {
        self.storage.get_by_hash(hash).await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.storage.health_check().await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, StorageError> {
        self.storage.expiration_policy().await
    }
}

#[async_trait]
impl<S: StorageService> DataAvailabilityService for SignAfterStoreDas<S> {
    async fn store(
        &self,
        message: Bytes,
        timeout: u64,
        sig: Bytes,
    ) -> Result<DataAvailabilityCertificate, DasError> {
        if let Some(verifier) = &self.verifier {
            verifier.verify(&message, timeout, &sig)?;
        }

        let now = now_unix();
        if timeout < now {
            return Err(DasError::TimeoutInPast { timeout, now });
        }

        let data_hash = content_hash(&message);
        let len = message.len();
        self.storage.put(message, timeout).await?;
        self.storage.sync().await?;

        let sig = sign_with_prefix(
            &self.secret_key,
            signable_fields(data_hash, timeout, self.signers_mask),
        );
        debug!(?data_hash, len, timeout, "Stored and signed");

        Ok(DataAvailabilityCertificate {
            keyset_hash: self.keyset_hash,
            data_hash,
            timeout,
            signers_mask: self.signers_mask,
            sig,
            version: 0,
        })
    }
}
