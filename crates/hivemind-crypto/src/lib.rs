//! # Hivemind Cryptography
//!
//! Cryptographic primitives backing the SPNS hivemind:
//!
//! - Ed25519 <-> X25519 conversion, for validating that a Session ID's embedded X25519 key
//!   matches a supplied Ed25519 pubkey.
//! - Subkey-delegated Ed25519 signature verification (the storage-server "subkey" scheme).
//! - BLAKE2b hashing (keyed, for subkey derivation; unkeyed, for the dedup filter).
//! - XChaCha20-Poly1305 payload encryption, for test fixtures emulating a notifier worker.

pub mod error;
pub mod hash;
pub mod keys;
pub mod payload;
pub mod signature;

pub use error::{CryptoError, Result};
pub use hash::{blake2b_256, blake2b_256_keyed};
pub use keys::{
    derive_notifier_key, ed25519_pubkey_to_x25519, load_key_material, verify_session_id_derivation,
    NodeKeyPair,
};
pub use payload::{decrypt_push_payload, encrypt_push_payload, pad_to_multiple};
pub use signature::{derive_subkey_pubkey, monitor_sig_message, unsubscribe_sig_message, verify_storage_signature};
