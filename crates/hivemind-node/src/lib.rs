//! The hivemind coordinator: wires `hivemind-store`, `hivemind-network`, and `hivemind-notify`
//! behind one reentrant lock, exposes the RequestRouter RPC surface, and drives topology refresh
//! from the Oxen daemon's block stream.

pub mod block_watcher;
pub mod config;
pub mod coordinator;
pub mod listener;
pub mod oxend;
pub mod request_router;

pub use block_watcher::BlockWatcher;
pub use config::HivemindConfig;
pub use coordinator::Coordinator;
pub use listener::Listener;
pub use oxend::{HttpOxendClient, OxendClient};
pub use request_router::RequestRouter;
