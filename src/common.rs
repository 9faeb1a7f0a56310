use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use alloy::primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length in bytes of a content hash.
pub const HASH_LEN: usize = 32;

/// Returns the content hash (keccak-256) under which `data` is stored.
#[inline]
pub fn content_hash(data: impl AsRef<[u8]>) -> B256 {
    keccak256(data)
}

/// Returns the current UNIX time in seconds.
pub fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// Returns `now + secs`, saturating at `u64::MAX` ("never expires").
#[inline]
pub fn expiry_from_now(secs: u64) -> u64 {
    now_unix().saturating_add(secs)
}

/// Decodes a hex storage key, with or without `0x` prefix.
pub fn decode_storage_key(key: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(key.strip_prefix("0x").unwrap_or(key))
}

/// An error that can occur when reading from or writing to a storage backend.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StorageError {
    #[error("not found")]
    NotFound,
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("preimage mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: B256, actual: B256 },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

impl StorageError {
    /// Returns true if the error signals plain absence of the requested hash.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// An error that can occur when talking to the base chain.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("failed to decode event: {0}")]
    Decode(String),
    #[error("block number too large")]
    BlockNumberOverflow,
    #[error("event subscription closed")]
    SubscriptionClosed,
}

impl From<alloy::transports::TransportError> for ChainError {
    fn from(err: alloy::transports::TransportError) -> Self {
        Self::Rpc(err.to_string())
    }
}

impl From<alloy::contract::Error> for ChainError {
    fn from(err: alloy::contract::Error) -> Self {
        Self::Rpc(err.to_string())
    }
}

/// How long a storage backend retains the data it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    /// Data is kept forever.
    KeepForever,
    /// Data is kept until the archive timeout of the archiving node.
    DiscardAfterArchiveTimeout,
    /// Data is kept until the timeout given with the `Put` call.
    DiscardAfterDataTimeout,
    /// A mix of the policies of several underlying backends.
    MixedTimeout,
    /// Data is never stored.
    DiscardImmediately,
}

impl ExpirationPolicy {
    /// The wire name of the policy.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KeepForever => "KeepForever",
            Self::DiscardAfterArchiveTimeout => "DiscardAfterArchiveTimeout",
            Self::DiscardAfterDataTimeout => "DiscardAfterDataTimeout",
            Self::MixedTimeout => "MixedTimeout",
            Self::DiscardImmediately => "DiscardImmediately",
        }
    }
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known [`ExpirationPolicy`].
#[derive(Debug, Error)]
#[error("invalid expiration policy: {0}")]
pub struct InvalidExpirationPolicy(pub String);

impl FromStr for ExpirationPolicy {
    type Err = InvalidExpirationPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KeepForever" => Ok(Self::KeepForever),
            "DiscardAfterArchiveTimeout" => Ok(Self::DiscardAfterArchiveTimeout),
            "DiscardAfterDataTimeout" => Ok(Self::DiscardAfterDataTimeout),
            "MixedTimeout" => Ok(Self::MixedTimeout),
            "DiscardImmediately" => Ok(Self::DiscardImmediately),
            other => Err(InvalidExpirationPolicy(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_saturates() {
        assert_eq!(expiry_from_now(u64::MAX), u64::MAX);
        assert!(expiry_from_now(10) >= now_unix());
    }

    #[test]
    fn test_expiration_policy_names() {
        for policy in [
            ExpirationPolicy::KeepForever,
            ExpirationPolicy::DiscardAfterArchiveTimeout,
            ExpirationPolicy::DiscardAfterDataTimeout,
            ExpirationPolicy::MixedTimeout,
            ExpirationPolicy::DiscardImmediately,
        ] {
            assert_eq!(policy.as_str().parse::<ExpirationPolicy>().unwrap(), policy);
        }
        assert!("Sometimes".parse::<ExpirationPolicy>().is_err());
    }

    #[test]
    fn test_decode_storage_key() {
        assert_eq!(decode_storage_key("0xabcd").unwrap(), vec![0xab, 0xcd]);
        assert_eq!(decode_storage_key("abcd").unwrap(), vec![0xab, 0xcd]);
        assert!(decode_storage_key("zz").is_err());
    }
}
