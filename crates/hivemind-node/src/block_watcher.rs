//! Tracks the Oxen daemon's chain head and schedules `SwarmTopology` refreshes.
//!
//! The real daemon exposes a `sub.block` push subscription; absent a live oxenmq endpoint to
//! subscribe against, this polls `get_info` on a short interval and treats a changed
//! `block_hash` as the equivalent of a delivered block notification. A second, independent
//! ticker at `subs_interval` re-triggers a refresh regardless of whether the block hash moved,
//! giving liveness if polling stalls or the daemon's block production pauses.

use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::Coordinator;
use crate::oxend::OxendClient;

/// How often `get_info` is polled to detect a new block. Independent of `subs_interval`, which
/// is the defensive fallback tick.
const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct BlockWatcher {
    coordinator: Arc<Coordinator>,
    oxend: Arc<dyn OxendClient>,
    subs_interval: Duration,
}

impl BlockWatcher {
    pub fn new(coordinator: Arc<Coordinator>, oxend: Arc<dyn OxendClient>, subs_interval: Duration) -> Self {
        Self { coordinator, oxend, subs_interval }
    }

    /// Spawns the watch loop as a detached background task and returns immediately.
    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        let mut last_block_hash: Option<String> = None;
        let mut block_ticker = tokio::time::interval(BLOCK_POLL_INTERVAL);
        let mut subs_ticker = tokio::time::interval(self.subs_interval);

        loop {
            tokio::select! {
                _ = block_ticker.tick() => {
                    match self.oxend.get_info().await {
                        Ok(info) => {
                            if last_block_hash.as_deref() != Some(info.block_hash.as_str()) {
                                tracing::debug!(height = info.height, block_hash = %info.block_hash, "new block observed");
                                last_block_hash = Some(info.block_hash);
                                self.coordinator.refresh_topology().await;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "block watch poll failed, leaving topology unchanged");
                        }
                    }
                }
                _ = subs_ticker.tick() => {
                    tracing::debug!("defensive periodic topology refresh");
                    self.coordinator.refresh_topology().await;
                }
            }
        }
    }
}
