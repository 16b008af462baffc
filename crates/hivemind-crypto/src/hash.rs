//! BLAKE2b hashing helpers used for subkey derivation and dedup filter keys.

use blake2::digest::consts::U32;
use blake2::digest::{FixedOutput, KeyInit, Mac, Update, VariableOutput};
use blake2::{Blake2bMac, Blake2bVar};

/// `BLAKE2b(data, digest_size=32)`, unkeyed. Used to compute the dedup filter's
/// `H(service || service_id || msg_hash)` value.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2bVar::new(32).expect("32 is a valid BLAKE2b digest size");
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher
        .finalize_variable(&mut out)
        .expect("output buffer matches requested digest size");
    out
}

/// `BLAKE2b(data, digest_size=32, key=key)`. Used for the subkey-tag derivation hash
/// `H(subkey_tag || ed25519_pubkey, key="OxenSSSubkey")`.
pub fn blake2b_256_keyed(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <Blake2bMac<U32> as KeyInit>::new_from_slice(key)
        .expect("BLAKE2b key must be at most the block size");
    Mac::update(&mut mac, data);
    let result = mac.finalize_fixed();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unkeyed_hash_is_deterministic() {
        let a = blake2b_256(b"hello");
        let b = blake2b_256(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn keyed_hash_differs_from_unkeyed() {
        let unkeyed = blake2b_256(b"hello");
        let keyed = blake2b_256_keyed(b"OxenSSSubkey", b"hello");
        assert_ne!(unkeyed, keyed);
    }

    #[test]
    fn single_bit_input_change_changes_output() {
        let a = blake2b_256(b"hello");
        let b = blake2b_256(b"hellp");
        assert_ne!(a, b);
    }
}
