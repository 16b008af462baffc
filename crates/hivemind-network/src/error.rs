//! Networking-layer errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport closed")]
    Closed,

    #[error(transparent)]
    Proto(#[from] hivemind_proto::ProtoError),

    #[error(transparent)]
    Store(#[from] hivemind_store::StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
