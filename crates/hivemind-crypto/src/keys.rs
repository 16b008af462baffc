//! Key material handling: X25519 node keys and the Ed25519-to-X25519 conversion that
//! underlies Session ID validation.

use crate::error::{CryptoError, Result};
use curve25519_dalek::edwards::CompressedEdwardsY;

/// Converts an Ed25519 public key to the X25519 (Montgomery) public key it corresponds to,
/// equivalent to libsodium's `crypto_sign_ed25519_pk_to_curve25519`.
pub fn ed25519_pubkey_to_x25519(ed25519_pubkey: &[u8; 32]) -> Result<[u8; 32]> {
    let point = CompressedEdwardsY(*ed25519_pubkey)
        .decompress()
        .ok_or(CryptoError::MalformedPoint)?;
    Ok(point.to_montgomery().to_bytes())
}

/// Verifies that `session_ed25519` is the Ed25519 key underlying the 05-prefixed `account_id`,
/// i.e. that its X25519 conversion equals `account_id[1:]`.
pub fn verify_session_id_derivation(account_id: &[u8; 33], session_ed25519: &[u8; 32]) -> Result<()> {
    let derived = ed25519_pubkey_to_x25519(session_ed25519)?;
    if derived == account_id[1..33] {
        Ok(())
    } else {
        Err(CryptoError::IdConversionMismatch)
    }
}

/// A node's long-lived X25519 identity keypair (what the hivemind and onionreq keys in the
/// config file load into).
pub struct NodeKeyPair {
    secret: x25519_dalek::StaticSecret,
    public: x25519_dalek::PublicKey,
}

impl NodeKeyPair {
    /// Builds a keypair from a 32-byte X25519 secret scalar.
    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> Self {
        let secret = x25519_dalek::StaticSecret::from(secret_bytes);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn secret(&self) -> &x25519_dalek::StaticSecret {
        &self.secret
    }

    /// Raw scalar bytes, needed wherever a key is mixed into a hash rather than used for a
    /// Diffie-Hellman (e.g. [`derive_notifier_key`]).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }
}

/// Derives a per-notifier session key from the hivemind's own key material and the notifier's
/// service name, so each notifier worker gets a distinct key without provisioning one by hand.
pub fn derive_notifier_key(hivemind_secret: &[u8; 32], service_name: &str) -> [u8; 32] {
    let mut data = Vec::with_capacity(32 + service_name.len());
    data.extend_from_slice(hivemind_secret);
    data.extend_from_slice(service_name.as_bytes());
    crate::hash::blake2b_256_keyed(b"notifier", &data)
}

/// Parses key material read from a hivemind key file: either 32 raw bytes, or a file
/// containing 64 hex characters (whitespace-trimmed).
pub fn load_key_material(raw: &[u8]) -> Result<[u8; 32]> {
    if raw.len() == 32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(raw);
        return Ok(out);
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| CryptoError::InvalidKeyFile(raw.len()))?
        .trim();
    if text.len() != 64 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CryptoError::InvalidKeyFile(raw.len()));
    }
    let bytes = hex::decode(text).map_err(|e| CryptoError::Hex(e.to_string()))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
