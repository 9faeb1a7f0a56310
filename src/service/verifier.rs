use alloy::{
    primitives::{keccak256, Address, Bytes, Signature, B256},
    signers::{local::PrivateKeySigner, SignerSync},
};
use tracing::debug;

use super::DasError;

/// Domain separator of store request signatures.
pub const STORE_REQUEST_PREFIX: &[u8] = b"Arbitrum Nitro DAS API Store:";

/// Returns the digest a batch poster signs to authorize storing `message` until `timeout`.
pub fn store_request_hash(message: &[u8], timeout: u64) -> B256 {
    let mut buf = Vec::with_capacity(STORE_REQUEST_PREFIX.len() + 8 + message.len());
    buf.extend_from_slice(STORE_REQUEST_PREFIX);
    buf.extend_from_slice(&timeout.to_be_bytes());
    buf.extend_from_slice(message);
    keccak256(buf)
}

/// Signs a store request as the batch poster. Returns the 65 byte `r | s | v` signature.
pub fn sign_store_request(
    signer: &PrivateKeySigner,
    message: &[u8],
    timeout: u64,
) -> Result<Bytes, alloy::signers::Error> {
    let sig = signer.sign_hash_sync(&store_request_hash(message, timeout))?;
    Ok(Bytes::copy_from_slice(&sig.as_bytes()))
}

/// Accepts store requests signed by a single batch poster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRequestVerifier {
    batch_poster: Address,
}

impl StoreRequestVerifier {
    /// Creates a verifier accepting signatures by `batch_poster`.
    pub const fn new(batch_poster: Address) -> Self {
        Self { batch_poster }
    }

    /// The accepted signer.
    pub const fn batch_poster(&self) -> Address {
        self.batch_poster
    }

    /// Checks that `sig` is the batch poster's signature over the store request.
    pub fn verify(&self, message: &[u8], timeout: u64, sig: &[u8]) -> Result<(), DasError> {
        let sig = Signature::try_from(sig)
            .map_err(|e| DasError::SignatureInvalid(format!("malformed signature: {e}")))?;
        let signer = sig
            .recover_address_from_prehash(&store_request_hash(message, timeout))
            .map_err(|e| DasError::SignatureInvalid(e.to_string()))?;

        if signer != self.batch_poster {
            debug!(%signer, expected = %self.batch_poster, "Store request from unknown signer");
            return Err(DasError::SignatureInvalid(format!("unexpected signer {signer}")));
        }

        Ok(())
    }
}
