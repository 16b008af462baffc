//! Construction and verification of the subscribe/unsubscribe signature messages, including
//! delegated (subkey) authentication.

use crate::error::{CryptoError, Result};
use crate::hash::blake2b_256_keyed;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{Signature, VerifyingKey};

/// Domain-separation key used for subkey derivation, matching the storage server's scheme.
const SUBKEY_DERIVATION_KEY: &[u8] = b"OxenSSSubkey";

/// Builds the `"MONITOR" || HEX(account.id) || DEC(sig_ts) || ('0'|'1') || namespaces` message
/// that a subscribe request's signature is computed over.
pub fn monitor_sig_message(account_id: &[u8; 33], sig_ts: i64, want_data: bool, namespaces: &[i16]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(7 + 66 + 11 + 1 + namespaces.len() * 6);
    msg.extend_from_slice(b"MONITOR");
    msg.extend_from_slice(hex::encode(account_id).as_bytes());
    msg.extend_from_slice(sig_ts.to_string().as_bytes());
    msg.push(if want_data { b'1' } else { b'0' });
    for (i, ns) in namespaces.iter().enumerate() {
        if i > 0 {
            msg.push(b',');
        }
        msg.extend_from_slice(ns.to_string().as_bytes());
    }
    msg
}

/// Builds the `"UNSUBSCRIBE" || HEX(account.id) || DEC(sig_ts)` message that an unsubscribe
/// request's signature is computed over.
pub fn unsubscribe_sig_message(account_id: &[u8; 33], sig_ts: i64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(11 + 66 + 11);
    msg.extend_from_slice(b"UNSUBSCRIBE");
    msg.extend_from_slice(hex::encode(account_id).as_bytes());
    msg.extend_from_slice(sig_ts.to_string().as_bytes());
    msg
}

/// Derives the effective verification pubkey for a delegated (subkey) signature:
/// `pk' = (subkey_tag + BLAKE2b(subkey_tag || ed25519_pubkey, key="OxenSSSubkey") mod L) * A`,
/// performed without clamping either scalar.
pub fn derive_subkey_pubkey(ed25519_pubkey: &[u8; 32], subkey_tag: &[u8; 32]) -> Result<[u8; 32]> {
    let mut input = Vec::with_capacity(64);
    input.extend_from_slice(subkey_tag);
    input.extend_from_slice(ed25519_pubkey);
    let h = blake2b_256_keyed(SUBKEY_DERIVATION_KEY, &input);

    let c = Scalar::from_bytes_mod_order(*subkey_tag);
    let h_scalar = Scalar::from_bytes_mod_order(h);
    let combined = c + h_scalar;

    let a_point = CompressedEdwardsY(*ed25519_pubkey)
        .decompress()
        .ok_or(CryptoError::MalformedPoint)?;
    let derived = combined * a_point;
    Ok(derived.compress().to_bytes())
}

/// Verifies `signature` over `sig_msg` against `ed25519_pubkey`, or against the subkey-derived
/// pubkey when `subkey_tag` is provided.
pub fn verify_storage_signature(
    sig_msg: &[u8],
    signature: &[u8; 64],
    ed25519_pubkey: &[u8; 32],
    subkey_tag: Option<&[u8; 32]>,
) -> Result<()> {
    let verify_key_bytes = match subkey_tag {
        Some(tag) => derive_subkey_pubkey(ed25519_pubkey, tag)?,
        None => *ed25519_pubkey,
    };

    let verifying_key =
        VerifyingKey::from_bytes(&verify_key_bytes).map_err(|_| CryptoError::MalformedPoint)?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify_strict(sig_msg, &sig)
        .map_err(|_| CryptoError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn monitor_message_matches_expected_layout() {
        let id = [0x05u8; 33];
        let msg = monitor_sig_message(&id, 1700000000, true, &[0, 1, 2]);
        let s = String::from_utf8(msg).unwrap();
        let expected = format!("MONITOR{}17000000001" , hex::encode(id)) + "0,1,2";
        assert_eq!(s, expected);
    }

    #[test]
    fn unsubscribe_message_matches_expected_layout() {
        let id = [0x11u8; 33];
        let msg = unsubscribe_sig_message(&id, 42);
        let s = String::from_utf8(msg).unwrap();
        assert_eq!(s, format!("UNSUBSCRIBE{}42", hex::encode(id)));
    }

    #[test]
    fn standard_signature_round_trips() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let id = [0x11u8; 33];
        let msg = monitor_sig_message(&id, 1700000000, false, &[5]);
        let sig = signing_key.sign(&msg);

        verify_storage_signature(
            &msg,
            &sig.to_bytes(),
            signing_key.verifying_key().as_bytes(),
            None,
        )
        .unwrap();
    }

    #[test]
    fn bit_flip_breaks_verification() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let id = [0x11u8; 33];
        let msg = monitor_sig_message(&id, 1700000000, false, &[5]);
        let mut sig = signing_key.sign(&msg).to_bytes();
        sig[0] ^= 1;

        assert!(verify_storage_signature(
            &msg,
            &sig,
            signing_key.verifying_key().as_bytes(),
            None
        )
        .is_err());
    }

    #[test]
    fn subkey_signature_verifies_against_derived_key_only() {
        use ed25519_dalek::hazmat::{raw_sign, ExpandedSecretKey};
        use sha2::Sha512;

        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let ed_pubkey = *signing_key.verifying_key().as_bytes();
        let subkey_tag = [0x42u8; 32];

        let derived_pub = derive_subkey_pubkey(&ed_pubkey, &subkey_tag).unwrap();

        // Build an ExpandedSecretKey whose scalar is the subkey-derived scalar
        // `a * (c + H(c || A))`, so its public point matches `derived_pub`, then sign with it
        // directly (bypassing the normal seed->scalar clamping path, which a delegated
        // subkey signer does not go through either).
        let owner_expanded = ExpandedSecretKey::from(&signing_key);
        let mut input = Vec::with_capacity(64);
        input.extend_from_slice(&subkey_tag);
        input.extend_from_slice(&ed_pubkey);
        let h = blake2b_256_keyed(SUBKEY_DERIVATION_KEY, &input);
        let c = Scalar::from_bytes_mod_order(subkey_tag);
        let h_scalar = Scalar::from_bytes_mod_order(h);
        let derived_scalar = owner_expanded.scalar * (c + h_scalar);

        let derived_expanded = ExpandedSecretKey {
            scalar: derived_scalar,
            hash_prefix: owner_expanded.hash_prefix,
        };
        let derived_verifying = VerifyingKey::from_bytes(&derived_pub).unwrap();

        let msg = monitor_sig_message(&[0x05u8; 33], 1700000000, true, &[0, 1]);
        let sig = raw_sign::<Sha512>(&derived_expanded, &msg, &derived_verifying);

        verify_storage_signature(&msg, &sig.to_bytes(), &ed_pubkey, Some(&subkey_tag)).unwrap();
        assert!(verify_storage_signature(&msg, &sig.to_bytes(), &ed_pubkey, None).is_err());
    }
}
