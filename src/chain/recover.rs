use alloy::primitives::{Bytes, B256};
use hashbrown::HashMap;
use thiserror::Error;
use tracing::{error, trace, warn};

use crate::{
    common::{content_hash, StorageError},
    primitives::{
        batch_max_timestamp,
        tree::{left_size, TreeError, TreeNode},
        CertError, DataAvailabilityCertificate, Keyset, KeysetError, BATCH_HEADER_LEN,
    },
    storage::DataAvailabilityReader,
};

/// Certificates must outlive the batch's max timestamp by at least this long.
pub const MIN_CERT_LIFETIME_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Content-addressed preimages referenced by a batch, keyed by their hash.
pub type Preimages = HashMap<B256, Bytes>;

/// An error that can occur when recovering a batch payload.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum RecoveryError {
    #[error("failed to decode certificate: {0}")]
    Cert(#[from] CertError),
    #[error("failed to fetch keyset {hash}: {source}")]
    Keyset { hash: B256, source: StorageError },
    #[error("failed to decode keyset: {0}")]
    KeysetDecode(#[from] KeysetError),
    #[error("failed to fetch batch contents: {0}")]
    Payload(#[from] StorageError),
    #[error("invalid DA tree: {0}")]
    Tree(#[from] TreeError),
}

/// Recovers the payload of a DAS-backed batch from `reader`, recording every preimage it
/// fetches (keyset, payload and, for version-1 certificates, all tree nodes) in `preimages`.
///
/// Returns `Ok(None)` if the batch must be ignored: unsupported certificate version, invalid
/// signature, or a certificate that expires too soon. Preimages fetched before that point stay
/// recorded.
pub async fn recover_payload_from_batch<R: DataAvailabilityReader + ?Sized>(
    batch: &[u8],
    reader: &R,
    preimages: &mut Preimages,
) -> Result<Option<Bytes>, RecoveryError> {
    let cert_bytes = batch.get(BATCH_HEADER_LEN..).ok_or(CertError::Truncated)?;
    let cert = DataAvailabilityCertificate::deserialize(cert_bytes)?;

    if cert.version >= 2 {
        error!(version = cert.version, "Unsupported certificate version");
        return Ok(None);
    }

    let keyset_bytes = fetch_preimage(reader, cert.keyset_hash, preimages)
        .await
        .map_err(|source| RecoveryError::Keyset { hash: cert.keyset_hash, source })?;
    let keyset = Keyset::deserialize(&keyset_bytes)?;

    if let Err(err) = cert.verify(&keyset) {
        warn!(%err, keyset_hash = ?cert.keyset_hash, "Bad signature on DAS batch");
        return Ok(None);
    }

    let max_timestamp = batch_max_timestamp(batch).unwrap_or_default();
    if cert.timeout < max_timestamp.saturating_add(MIN_CERT_LIFETIME_SECONDS) {
        warn!(timeout = cert.timeout, max_timestamp, "Data availability cert expires too soon");
        return Ok(None);
    }

    let payload = match cert.version {
        0 => fetch_preimage(reader, cert.data_hash, preimages).await?,
        _ => tree_content(reader, cert.data_hash, preimages).await?,
    };

    Ok(Some(payload))
}

/// Fetches the preimage of `hash`, checks it hashes back to `hash` and records it.
async fn fetch_preimage<R: DataAvailabilityReader + ?Sized>(
    reader: &R,
    hash: B256,
    preimages: &mut Preimages,
) -> Result<Bytes, StorageError> {
    if let Some(known) = preimages.get(&hash) {
        return Ok(known.clone());
    }

    let preimage = reader.get_by_hash(hash).await?;
    let actual = content_hash(&preimage);
    if actual != hash {
        error!(expected = ?hash, ?actual, "Preimage mismatch");
        return Err(StorageError::HashMismatch { expected: hash, actual });
    }

    trace!(?hash, len = preimage.len(), "Recovered preimage");
    preimages.insert(hash, preimage.clone());
    Ok(preimage)
}

/// Reveals the data under a DA tree root. Flat hashes are accepted as single-preimage trees.
async fn tree_content<R: DataAvailabilityReader + ?Sized>(
    reader: &R,
    root: B256,
    preimages: &mut Preimages,
) -> Result<Bytes, RecoveryError> {
    let top = fetch_preimage(reader, root, preimages).await?;
    let total = match TreeNode::decode(&top) {
        TreeNode::Flat => return Ok(top),
        TreeNode::Leaf(bin) => return Ok(fetch_preimage(reader, bin, preimages).await?),
        TreeNode::Node { size, .. } => size,
    };

    // expand leftmost first so leaves come out in order
    let mut leaves = Vec::new();
    let mut stack = vec![(root, total)];
    while let Some((hash, size)) = stack.pop() {
        let preimage = fetch_preimage(reader, hash, preimages).await?;
        match TreeNode::decode(&preimage) {
            TreeNode::Node { left, right, size: recorded } => {
                if recorded != size {
                    return Err(TreeError::SizeMismatch { hash, expected: size, actual: recorded }
                        .into());
                }
                let left_len = left_size(size);
                let right_len = size.checked_sub(left_len).ok_or(TreeError::InvalidNode(hash))?;
                stack.push((right, right_len));
                stack.push((left, left_len));
            }
            TreeNode::Leaf(bin) => leaves.push((bin, size)),
            TreeNode::Flat => return Err(TreeError::InvalidNode(hash).into()),
        }
    }

    let mut payload = Vec::with_capacity(total as usize);
    for (bin, size) in leaves {
        let data = fetch_preimage(reader, bin, preimages).await?;
        if data.len() != size as usize {
            let actual = data.len() as u32;
            return Err(TreeError::SizeMismatch { hash: bin, expected: size, actual }.into());
        }
        payload.extend_from_slice(&data);
    }

    Ok(payload.into())
}
