#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations, missing_docs, rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod common;
pub use common::{
    content_hash, decode_storage_key, expiry_from_now, now_unix, ChainError, ExpirationPolicy,
    InvalidExpirationPolicy, StorageError, HASH_LEN,
};

mod primitives;
pub use primitives::{
    batch_max_timestamp, bls, is_das_batch, is_das_message_header_byte,
    is_tree_das_message_header_byte, signable_fields, tree, CertError,
    DataAvailabilityCertificate, Keyset, KeysetError, BATCH_HEADER_LEN, DAS_MESSAGE_HEADER_FLAG,
    MAX_KEYSET_SIZE, TREE_DAS_MESSAGE_HEADER_FLAG,
};

/// Content-addressed storage backends and their compositions.
pub mod storage;
pub use storage::{
    DataAvailabilityReader, FallbackConfig, FallbackStorageService, InMemoryStorageService,
    LogOnWriteError, RestfulDasClient, StorageService,
};

/// Base chain access and the batch data synchronizer.
pub mod chain;
pub use chain::{
    new_syncing_fallback_storage_service, BridgeContract, ChainFetchReader, ChainSynchronizer,
    InMemoryBridge, SequencerInbox, SyncError, SyncToStorageConfig,
};

/// The committee member facade issuing certificates.
pub mod service;
pub use service::{DasError, DataAvailabilityService, SignAfterStoreDas, StoreRequestVerifier};

/// JSON-RPC and REST transports.
pub mod server;
