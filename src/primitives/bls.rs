//! BLS signing primitives over the BLS12-381 `min_pk` variant.

use blst::{
    min_pk::{
        AggregatePublicKey, AggregateSignature, PublicKey as BlsPublicKey,
        SecretKey as BlsSecretKey, Signature as BlsSignature,
    },
    BLST_ERROR,
};
use rand::{thread_rng, RngCore};

/// The BLS Domain Separator used in Ethereum 2.0.
pub const BLS_DST_PREFIX: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Length of a compressed BLS public key.
pub const PUBLIC_KEY_LEN: usize = 48;

/// Length of a compressed BLS signature.
pub const SIGNATURE_LEN: usize = 96;

/// Sign the given data with the given BLS secret key.
/// Returns the BLS signature.
#[inline]
pub fn sign_with_prefix(key: &BlsSecretKey, data: impl AsRef<[u8]>) -> BlsSignature {
    key.sign(data.as_ref(), BLS_DST_PREFIX, &[])
}

/// Verify the given BLS signature against the given message and the public key.
/// Returns `true` if the signature is valid, `false` otherwise.
#[inline]
pub fn verify_signature(
    signature: &BlsSignature,
    pubkey: &BlsPublicKey,
    message: impl AsRef<[u8]>,
) -> bool {
    signature.verify(true, message.as_ref(), BLS_DST_PREFIX, &[], pubkey, true) ==
        BLST_ERROR::BLST_SUCCESS
}

/// Aggregate the given public keys into one. Returns `None` for an empty set.
pub fn aggregate_public_keys(pubkeys: &[&BlsPublicKey]) -> Option<BlsPublicKey> {
    if pubkeys.is_empty() {
        return None;
    }
    AggregatePublicKey::aggregate(pubkeys, false).ok().map(|agg| agg.to_public_key())
}

/// Aggregate the given signatures into one. Returns `None` for an empty set.
pub fn aggregate_signatures(sigs: &[&BlsSignature]) -> Option<BlsSignature> {
    if sigs.is_empty() {
        return None;
    }
    AggregateSignature::aggregate(sigs, false).ok().map(|agg| agg.to_signature())
}

/// Generate a random BLS secret key.
pub fn random_bls_secret() -> BlsSecretKey {
    let mut rng = thread_rng();
    let mut ikm = [0u8; 32];
    rng.fill_bytes(&mut ikm);
    BlsSecretKey::key_gen(&ikm, &[]).expect("32 bytes of ikm")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_verify() {
        let keys = [random_bls_secret(), random_bls_secret(), random_bls_secret()];
        let msg = b"signable fields";

        let sigs = keys.iter().map(|k| sign_with_prefix(k, msg)).collect::<Vec<_>>();
        let pubkeys = keys.iter().map(|k| k.sk_to_pk()).collect::<Vec<_>>();

        let agg_sig = aggregate_signatures(&sigs.iter().collect::<Vec<_>>()).unwrap();
        let agg_pk = aggregate_public_keys(&pubkeys.iter().collect::<Vec<_>>()).unwrap();

        assert!(verify_signature(&agg_sig, &agg_pk, msg));
        assert!(!verify_signature(&agg_sig, &pubkeys[0], msg));
        assert!(!verify_signature(&sigs[0], &pubkeys[0], b"other"));
    }

    #[test]
    fn test_empty_aggregate() {
        assert!(aggregate_public_keys(&[]).is_none());
        assert!(aggregate_signatures(&[]).is_none());
    }
}
