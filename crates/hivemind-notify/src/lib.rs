//! Registry and transport for SPNS notifier workers (apns/fcm/huawei/...), stat aggregation.

pub mod bus;
pub mod connection;
pub mod error;
pub mod stats;

pub use bus::{NotifierBus, DEFAULT_VALIDATE_TIMEOUT};
pub use connection::{FramedNotifierConnection, NotifierConnection, SharedConnection, WorkerRequest};
pub use error::{NotifyError, Result};
pub use stats::ServiceStats;
