//! Errors produced while decoding/encoding wire messages.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("field {0} must be {1} bytes, got {2}")]
    BadFieldLength(&'static str, usize, usize),

    #[error("field {0} is not valid hex or base64")]
    BadByteEncoding(&'static str),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("bencode encode error: {0}")]
    BencodeEncode(String),

    #[error("bencode decode error: {0}")]
    BencodeDecode(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] hivemind_core::CoreError),
}
