//! Core error types, including the client-facing error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for hivemind-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Internal validation/domain errors. These are mapped onto a [`SubscribeCode`] at the RPC
/// boundary; they are not themselves serialized to clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid account id: expected 33 bytes, got {0}")]
    InvalidAccountId(usize),

    #[error("session_ed25519 required for 05-prefixed account ids")]
    MissingSessionEd25519,

    #[error("session_ed25519 must not be supplied for non-05-prefixed account ids")]
    UnexpectedSessionEd25519,

    #[error("session_ed25519 does not convert to the given account id")]
    SessionIdMismatch,

    #[error("namespaces list is empty")]
    EmptyNamespaces,

    #[error("namespaces must be strictly increasing with no duplicates")]
    UnsortedNamespaces,

    #[error("namespace {0} is out of the allowed range [-32768, 32767]")]
    NamespaceOutOfRange(i32),

    #[error("signature must be 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("subkey tag must be 32 bytes, got {0}")]
    InvalidSubkeyTagLength(usize),

    #[error("enc_key must be 32 bytes, got {0}")]
    InvalidEncKeyLength(usize),

    #[error("sig_ts is missing")]
    MissingSigTs,

    #[error("sig_ts {sig_ts} is more than 14 days old (now={now})")]
    SigTsTooOld { sig_ts: i64, now: i64 },

    #[error("sig_ts {sig_ts} is too far in the future (now={now})")]
    SigTsTooNew { sig_ts: i64, now: i64 },

    #[error("signature verification failed")]
    BadSignature,

    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service_id must be at least 32 characters, got {0}")]
    ServiceIdTooShort(usize),

    #[error(transparent)]
    Crypto(#[from] hivemind_crypto::CryptoError),
}

/// The wire-level error/result taxonomy returned to clients, distinct from the
/// richer internal [`CoreError`] enum above. `OK` pairs with an `added`/`updated`/`removed`
/// flag rather than being returned itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum SubscribeCode {
    Ok = 0,
    BadInput = 1,
    ServiceNotAvailable = 2,
    ServiceTimeout = 3,
    Error = 4,
}

impl SubscribeCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
