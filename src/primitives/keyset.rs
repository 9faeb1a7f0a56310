use alloy::primitives::{Bytes, B256};
use blst::min_pk::{PublicKey as BlsPublicKey, Signature as BlsSignature};
use thiserror::Error;

use super::bls::{aggregate_public_keys, verify_signature};
use crate::common::content_hash;

/// The maximum number of committee members, bounded by the width of the signers mask.
pub const MAX_KEYSET_SIZE: usize = 64;

/// An error that can occur when decoding or using a keyset.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum KeysetError {
    #[error("keyset truncated")]
    Truncated,
    #[error("keyset has {0} keys, at most {MAX_KEYSET_SIZE} allowed")]
    TooManyKeys(u64),
    #[error("invalid BLS public key at index {index}: {reason}")]
    InvalidPublicKey { index: usize, reason: String },
    #[error("trailing bytes after keyset")]
    TrailingBytes,
    #[error("not enough signers: {non_signers} non-signers, {assumed_honest} assumed honest")]
    NotEnoughSigners { non_signers: u64, assumed_honest: u64 },
    #[error("signature verification failed")]
    SignatureInvalid,
}

/// The committee public-key set active for a range of certificates.
///
/// A certificate is valid if fewer than `assumed_honest` members did not sign,
/// and the aggregate signature verifies against the aggregate of the signers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyset {
    /// Number of members assumed to be honest.
    pub assumed_honest: u64,
    /// Ordered member keys. Bit `i` of a signers mask refers to `pubkeys[i]`.
    pub pubkeys: Vec<BlsPublicKey>,
}

impl Keyset {
    /// Creates a new keyset.
    pub fn new(assumed_honest: u64, pubkeys: Vec<BlsPublicKey>) -> Result<Self, KeysetError> {
        if pubkeys.len() > MAX_KEYSET_SIZE {
            return Err(KeysetError::TooManyKeys(pubkeys.len() as u64));
        }
        Ok(Self { assumed_honest, pubkeys })
    }

    /// Encodes the keyset as `assumedHonest | count | count * (len | pubkey)`.
    pub fn serialize(&self) -> Bytes {
        let mut buf = Vec::with_capacity(16 + self.pubkeys.len() * 50);
        buf.extend_from_slice(&self.assumed_honest.to_be_bytes());
        buf.extend_from_slice(&(self.pubkeys.len() as u64).to_be_bytes());
        for pk in &self.pubkeys {
            let pk_bytes = pk.to_bytes();
            buf.extend_from_slice(&(pk_bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(&pk_bytes);
        }
        buf.into()
    }

    /// The hash identifying this keyset, as recorded on chain.
    pub fn hash(&self) -> B256 {
        content_hash(self.serialize())
    }

    /// Decodes a keyset from its serialized form.
    pub fn deserialize(mut data: &[u8]) -> Result<Self, KeysetError> {
        let assumed_honest = read_u64(&mut data)?;
        let count = read_u64(&mut data)?;
        if count > MAX_KEYSET_SIZE as u64 {
            return Err(KeysetError::TooManyKeys(count));
        }

        let mut pubkeys = Vec::with_capacity(count as usize);
        for index in 0..count as usize {
            let len = u16::from_be_bytes(take::<2>(&mut data)?) as usize;
            if data.len() < len {
                return Err(KeysetError::Truncated);
            }
            let (pk_bytes, rest) = data.split_at(len);
            let pk = BlsPublicKey::from_bytes(pk_bytes).map_err(|e| {
                KeysetError::InvalidPublicKey { index, reason: format!("{e:?}") }
            })?;
            pubkeys.push(pk);
            data = rest;
        }

        if !data.is_empty() {
            return Err(KeysetError::TrailingBytes);
        }

        Ok(Self { assumed_honest, pubkeys })
    }

    /// Returns the index of the given key in the keyset, if it is a member.
    pub fn index_of(&self, pubkey: &BlsPublicKey) -> Option<usize> {
        self.pubkeys.iter().position(|pk| pk == pubkey)
    }

    /// Verifies that `sig` is a valid aggregate signature over `message` by the
    /// members named in `signers_mask`.
    pub fn verify_signature(
        &self,
        signers_mask: u64,
        message: &[u8],
        sig: &BlsSignature,
    ) -> Result<(), KeysetError> {
        let mut signers = Vec::with_capacity(self.pubkeys.len());
        let mut non_signers = 0u64;
        for (i, pk) in self.pubkeys.iter().enumerate() {
            if signers_mask & (1 << i) != 0 {
                signers.push(pk);
            } else {
                non_signers += 1;
            }
        }

        if non_signers >= self.assumed_honest {
            return Err(KeysetError::NotEnoughSigners {
                non_signers,
                assumed_honest: self.assumed_honest,
            });
        }

        let aggregate = aggregate_public_keys(&signers).ok_or(KeysetError::SignatureInvalid)?;
        if !verify_signature(sig, &aggregate, message) {
            return Err(KeysetError::SignatureInvalid);
        }

        Ok(())
    }
}

fn take<const N: usize>(data: &mut &[u8]) -> Result<[u8; N], KeysetError> {
    if data.len() < N {
        return Err(KeysetError::Truncated);
    }
    let (head, rest) = data.split_at(N);
    *data = rest;
    head.try_into().map_err(|_| KeysetError::Truncated)
}

fn read_u64(data: &mut &[u8]) -> Result<u64, KeysetError> {
    take::<8>(data).map(u64::from_be_bytes)
}
