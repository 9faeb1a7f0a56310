pub mod bls;

mod cert;
pub use cert::{
    batch_max_timestamp, is_das_batch, is_das_message_header_byte,
    is_tree_das_message_header_byte, signable_fields, CertError, DataAvailabilityCertificate,
    BATCH_HEADER_LEN, DAS_MESSAGE_HEADER_FLAG, TREE_DAS_MESSAGE_HEADER_FLAG,
};

mod keyset;
pub use keyset::{Keyset, KeysetError, MAX_KEYSET_SIZE};

pub mod tree;
