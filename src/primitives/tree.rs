//! Merkle tree over 64 KiB bins used by version-1 certificates.
//!
//! ```text
//!            r         <=>  H(0xff, H(0xff, 0, 1, L(0:1)), 2, L(0:2))
//!          /   \
//!         *     2      <=>  H(0xff, 0, 1, L(0:1)), 2
//!        / \
//!       0   1          <=>  0, 1, 2
//! ```
//!
//! Leaves are `H(0xfe, H(bin))`. Pairs are hashed together with the big-endian `u32` length of
//! the data below them, and an odd node out is bubbled up unchanged. Every intermediate value is
//! itself a keccak preimage, so the full data can be recovered from the root alone.

use alloy::primitives::{Bytes, B256};
use thiserror::Error;

use crate::common::content_hash;

/// Size of a leaf bin.
pub const BIN_SIZE: u32 = 64 * 1024;

/// First byte of an inner node preimage.
pub const NODE_BYTE: u8 = 0xff;

/// First byte of a leaf preimage.
pub const LEAF_BYTE: u8 = 0xfe;

const NODE_LEN: usize = 1 + 32 + 32 + 4;
const LEAF_LEN: usize = 1 + 32;

/// An error that can occur when walking a tree.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum TreeError {
    #[error("invalid tree node under {0}")]
    InvalidNode(B256),
    #[error("size mismatch under {hash}: expected {expected}, got {actual}")]
    SizeMismatch { hash: B256, expected: u32, actual: u32 },
    #[error("preimage too large for a tree")]
    TooLarge,
}

/// A decoded tree preimage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNode {
    /// An inner node covering `size` bytes.
    Node { left: B256, right: B256, size: u32 },
    /// A leaf pointing at the hash of its bin.
    Leaf(B256),
    /// Not a tree node: the preimage is the data itself.
    Flat,
}

impl TreeNode {
    /// Classifies a preimage fetched for some hash in the tree.
    pub fn decode(preimage: &[u8]) -> Self {
        match preimage.first() {
            Some(&NODE_BYTE) if preimage.len() == NODE_LEN => Self::Node {
                left: B256::from_slice(&preimage[1..33]),
                right: B256::from_slice(&preimage[33..65]),
                size: u32::from_be_bytes([preimage[65], preimage[66], preimage[67], preimage[68]]),
            },
            Some(&LEAF_BYTE) if preimage.len() == LEAF_LEN => {
                Self::Leaf(B256::from_slice(&preimage[1..]))
            }
            _ => Self::Flat,
        }
    }
}

/// Returns the number of bytes covered by the left child of a node covering `size` bytes.
pub fn left_size(size: u32) -> u32 {
    (size as u64).next_power_of_two().div_ceil(2) as u32
}

/// Computes the tree root of `preimage`, passing every `(hash, preimage)` pair of the tree
/// to `record`.
pub fn record_hash(
    preimage: &[u8],
    mut record: impl FnMut(B256, Bytes),
) -> Result<B256, TreeError> {
    let mut keccord = |data: Vec<u8>| {
        let hash = content_hash(&data);
        record(hash, data.into());
        hash
    };

    let length = u32::try_from(preimage.len()).map_err(|_| TreeError::TooLarge)?;
    if length == 0 {
        let inner = keccord(Vec::new());
        return Ok(keccord(prepend(LEAF_BYTE, &[inner.as_slice()])));
    }

    let mut layer = Vec::new();
    for bin in preimage.chunks(BIN_SIZE as usize) {
        let inner = keccord(bin.to_vec());
        let leaf = keccord(prepend(LEAF_BYTE, &[inner.as_slice()]));
        layer.push((leaf, bin.len() as u32));
    }

    while layer.len() > 1 {
        let mut paired = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            match pair {
                [(first, first_size), (other, other_size)] => {
                    let size = first_size + other_size;
                    let parent = keccord(prepend(
                        NODE_BYTE,
                        &[first.as_slice(), other.as_slice(), &size.to_be_bytes()],
                    ));
                    paired.push((parent, size));
                }
                [single] => paired.push(*single),
                _ => unreachable!("chunks of 2"),
            }
        }
        layer = paired;
    }

    Ok(layer[0].0)
}

/// Computes the tree root of `preimage`.
pub fn hash(preimage: &[u8]) -> Result<B256, TreeError> {
    record_hash(preimage, |_, _| {})
}

fn prepend(first: u8, rest: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + rest.iter().map(|r| r.len()).sum::<usize>());
    buf.push(first);
    for r in rest {
        buf.extend_from_slice(r);
    }
    buf
}
