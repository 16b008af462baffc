pub mod dedup;
pub mod error;
pub mod hive;
pub mod topology;
pub mod transport;

pub use dedup::{filter_value, DedupFilter};
pub use error::{NetworkError, Result};
pub use hive::{cooldown_for, ConnectionState, Hive, HiveEntry, COOLDOWN_SCHEDULE, DEFAULT_SUBS_REQUEST_LIMIT};
pub use topology::{RawNodeEntry, RefreshOutcome, SwarmTopology};
pub use transport::{SnodeConnection, SnodeConnector, TcpSnodeConnector};
