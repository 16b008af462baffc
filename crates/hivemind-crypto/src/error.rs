//! Error types for hivemind cryptographic operations.

use thiserror::Error;

/// Result type alias for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur while handling keys, signatures, or encrypted payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The supplied `session_ed25519` does not convert to the claimed account id.
    #[error("session_ed25519 does not convert to the given account id")]
    IdConversionMismatch,

    #[error("signature verification failed")]
    BadSignature,

    #[error("invalid subkey tag: expected 32 bytes, got {0}")]
    InvalidSubkeyTag(usize),

    #[error("key file must contain 32 raw bytes or 64 hex characters, got {0} bytes")]
    InvalidKeyFile(usize),

    #[error("hex decode error: {0}")]
    Hex(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("malformed ed25519 point")]
    MalformedPoint,
}
