use alloy::primitives::{Bytes, B256};
use blst::min_pk::Signature as BlsSignature;
use thiserror::Error;

use super::{
    bls::SIGNATURE_LEN,
    keyset::{Keyset, KeysetError},
};

/// Set in the header byte of a batch whose payload lives in the DAS.
pub const DAS_MESSAGE_HEADER_FLAG: u8 = 0x80;

/// Set together with [`DAS_MESSAGE_HEADER_FLAG`] when the certificate carries a version byte
/// and its data hash is a DA tree root.
pub const TREE_DAS_MESSAGE_HEADER_FLAG: u8 = 0x08;

/// Length of the fixed batch header preceding the header byte in sequencer batch data:
/// min/max timestamp, min/max L1 block and the delayed message count, all big-endian u64.
pub const BATCH_HEADER_LEN: usize = 40;

/// Returns true if the header byte marks a DAS-backed batch.
#[inline]
pub const fn is_das_message_header_byte(header: u8) -> bool {
    header & DAS_MESSAGE_HEADER_FLAG != 0
}

/// Returns true if the header byte marks a DAS-backed batch with a versioned certificate.
#[inline]
pub const fn is_tree_das_message_header_byte(header: u8) -> bool {
    is_das_message_header_byte(header) && header & TREE_DAS_MESSAGE_HEADER_FLAG != 0
}

/// Returns true if the sequencer batch data carries a DAS certificate.
pub fn is_das_batch(data: &[u8]) -> bool {
    data.get(BATCH_HEADER_LEN).copied().is_some_and(is_das_message_header_byte)
}

/// Returns the max timestamp field of the batch header, if present.
pub fn batch_max_timestamp(data: &[u8]) -> Option<u64> {
    data.get(8..16).and_then(|b| b.try_into().ok()).map(u64::from_be_bytes)
}

/// An error that can occur when decoding a certificate.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CertError {
    #[error("not a DAS message header byte: {0:#04x}")]
    BadHeader(u8),
    #[error("certificate truncated")]
    Truncated,
    #[error("invalid BLS signature: {0}")]
    SignatureInvalid(String),
}

/// A signed commitment by (a quorum of) the committee to keep the preimage of `data_hash`
/// retrievable until `timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAvailabilityCertificate {
    /// Hash of the keyset that was active when the certificate was signed.
    pub keyset_hash: B256,
    /// Content hash of the data, or the DA tree root for version 1.
    pub data_hash: B256,
    /// UNIX seconds after which the commitment expires.
    pub timeout: u64,
    /// Bit `i` is set if keyset member `i` signed.
    pub signers_mask: u64,
    /// Aggregate signature over the signable fields.
    pub sig: BlsSignature,
    /// Certificate version. 0 means flat hash, 1 means DA tree root.
    pub version: u8,
}

impl DataAvailabilityCertificate {
    /// Returns the bytes covered by the signature: `dataHash | timeout | signersMask`.
    pub fn signable_fields(&self) -> Vec<u8> {
        signable_fields(self.data_hash, self.timeout, self.signers_mask)
    }

    /// Verifies the aggregate signature against the given keyset.
    pub fn verify(&self, keyset: &Keyset) -> Result<(), KeysetError> {
        keyset.verify_signature(self.signers_mask, &self.signable_fields(), &self.sig)
    }

    /// The header byte this certificate is serialized with.
    pub const fn header_byte(&self) -> u8 {
        if self.version == 0 {
            DAS_MESSAGE_HEADER_FLAG
        } else {
            DAS_MESSAGE_HEADER_FLAG | TREE_DAS_MESSAGE_HEADER_FLAG
        }
    }

    /// Encodes the certificate as it appears after the batch header.
    pub fn serialize(&self) -> Bytes {
        let mut buf = Vec::with_capacity(1 + 32 + 32 + 8 + 1 + 8 + SIGNATURE_LEN);
        buf.push(self.header_byte());
        buf.extend_from_slice(self.keyset_hash.as_slice());
        buf.extend_from_slice(self.data_hash.as_slice());
        buf.extend_from_slice(&self.timeout.to_be_bytes());
        if self.version != 0 {
            buf.push(self.version);
        }
        buf.extend_from_slice(&self.signers_mask.to_be_bytes());
        buf.extend_from_slice(&self.sig.to_bytes());
        buf.into()
    }

    /// Decodes a certificate, starting at the header byte.
    pub fn deserialize(data: &[u8]) -> Result<Self, CertError> {
        let mut rd = data;
        let [header] = take::<1>(&mut rd)?;
        if !is_das_message_header_byte(header) {
            return Err(CertError::BadHeader(header));
        }

        let keyset_hash = B256::from(take::<32>(&mut rd)?);
        let data_hash = B256::from(take::<32>(&mut rd)?);
        let timeout = u64::from_be_bytes(take::<8>(&mut rd)?);
        let version =
            if is_tree_das_message_header_byte(header) { take::<1>(&mut rd)?[0] } else { 0 };
        let signers_mask = u64::from_be_bytes(take::<8>(&mut rd)?);
        let sig_bytes = take::<SIGNATURE_LEN>(&mut rd)?;
        let sig = BlsSignature::from_bytes(&sig_bytes)
            .map_err(|e| CertError::SignatureInvalid(format!("{e:?}")))?;

        Ok(Self { keyset_hash, data_hash, timeout, signers_mask, sig, version })
    }
}

/// Returns the bytes a committee member signs for the given certificate fields.
pub fn signable_fields(data_hash: B256, timeout: u64, signers_mask: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(48);
    buf.extend_from_slice(data_hash.as_slice());
    buf.extend_from_slice(&timeout.to_be_bytes());
    buf.extend_from_slice(&signers_mask.to_be_bytes());
    buf
}

fn take<const N: usize>(data: &mut &[u8]) -> Result<[u8; N], CertError> {
    if data.len() < N {
        return Err(CertError::Truncated);
    }
    let (head, rest) = data.split_at(N);
    *data = rest;
    head.try_into().map_err(|_| CertError::Truncated)
}
