use std::sync::Arc;

use alloy::primitives::Bytes;
use async_trait::async_trait;

use super::DasError;
use crate::{primitives::DataAvailabilityCertificate, storage::DataAvailabilityReader};

/// A committee member: stores batch data and certifies that it will stay retrievable.
#[async_trait]
pub trait DataAvailabilityService: DataAvailabilityReader {
    /// Stores `message` until `timeout` (UNIX seconds) and returns a certificate over it.
    ///
    /// `sig` authenticates the caller; it is ignored unless the service verifies store requests.
    async fn store(
        &self,
        message: Bytes,
        timeout: u64,
        sig: Bytes,
    ) -> Result<DataAvailabilityCertificate, DasError>;
}

#[async_trait]
impl<T: DataAvailabilityService + ?Sized> DataAvailabilityService for Arc<T> {
    async fn store(
        &self,
        message: Bytes,
        timeout: u64,
        sig: Bytes,
    ) -> Result<DataAvailabilityCertificate, DasError> {
        (**self).store(message, timeout, sig).await
    }
}
