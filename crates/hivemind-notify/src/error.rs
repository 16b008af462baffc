use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotifyError>;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notifier service {0:?} is not registered")]
    ServiceNotAvailable(String),

    #[error("notifier validate round-trip timed out")]
    ValidateTimeout,

    #[error("notifier {0:?} returned svc_id shorter than 32 bytes")]
    SvcIdTooShort(String),

    #[error("notifier {service:?} rejected the request: {message}")]
    Rejected { service: String, code: i32, message: String },

    #[error(transparent)]
    Proto(#[from] hivemind_proto::ProtoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
