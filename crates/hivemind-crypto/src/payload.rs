//! XChaCha20-Poly1305 encryption of the device push payload.
//!
//! This is the algorithm a notifier worker applies to a push envelope before calling its
//! vendor API; notifier workers themselves are
//! out of scope for the hivemind core, but the primitive is exposed here so it can be reused
//! by in-repo test fixtures that emulate one end-to-end.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

/// Pads `data` with trailing zero bytes up to the next multiple of `block_size`.
pub fn pad_to_multiple(mut data: Vec<u8>, block_size: usize) -> Vec<u8> {
    let remainder = data.len() % block_size;
    if remainder != 0 {
        data.resize(data.len() + (block_size - remainder), 0u8);
    }
    data
}

/// Encrypts `plaintext` with XChaCha20-Poly1305 under `enc_key`, prepending the random
/// 24-byte nonce to the returned ciphertext.
pub fn encrypt_push_payload(enc_key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(enc_key));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .expect("XChaCha20-Poly1305 encryption does not fail for bounded plaintexts");

    let mut out = Vec::with_capacity(24 + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypts a payload produced by [`encrypt_push_payload`]. Used by tests only; real devices
/// perform this step, not the hivemind core.
pub fn decrypt_push_payload(enc_key: &[u8; 32], payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() < 24 {
        return None;
    }
    let (nonce_bytes, ciphertext) = payload.split_at(24);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(enc_key));
    let nonce = XNonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).ok()
}
