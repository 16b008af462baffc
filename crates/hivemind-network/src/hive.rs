//! Per-service-node connection management: connection state machine, cooldown
//! backoff, and the lazily-deleted per-account resubscribe queue.
//!
//! This module holds no lock of its own and performs no I/O: it is pure bookkeeping meant to
//! live inside a coordinator's single mutex. The coordinator is responsible for
//! cloning out whatever a connection attempt or RPC needs, releasing the lock, awaiting the
//! I/O, and feeding the result back via `on_connect_success`/`on_connect_failure`.

use std::collections::{HashSet, VecDeque};

use hivemind_core::ServiceNode;
use hivemind_proto::SubscribeRecord;
use rand::Rng;
use std::sync::Arc;

use crate::transport::SnodeConnection;

/// Cooldown (seconds) after `N` consecutive connection failures, indexed by `N - 1` and
/// saturating at the last entry.
pub const COOLDOWN_SCHEDULE: [u64; 4] = [10, 30, 60, 120];

pub fn cooldown_for(consecutive_failures: u32) -> u64 {
    let idx = (consecutive_failures.saturating_sub(1) as usize).min(COOLDOWN_SCHEDULE.len() - 1);
    COOLDOWN_SCHEDULE[idx]
}

const RESUBSCRIBE_MIN_SECS: u64 = 45 * 60;
const RESUBSCRIBE_MAX_SECS: u64 = 55 * 60;

/// The default `subs_request_limit`: the approximate serialized byte cap per `monitor.messages`
/// batch.
pub const DEFAULT_SUBS_REQUEST_LIMIT: usize = 5 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One pending or scheduled resubscription. `None` marks a tombstoned (lazily deleted) entry.
type NextEntry = Option<([u8; 33], i64)>;

pub struct HiveEntry {
    pub node: ServiceNode,
    state: ConnectionState,
    connection: Option<Arc<dyn SnodeConnection>>,
    consecutive_failures: u32,
    cooldown_until: Option<i64>,
    subs: HashSet<[u8; 33]>,
    next: VecDeque<NextEntry>,
    /// True while a `monitor.messages` request is in flight; Hive never issues a second one
    /// concurrently against the same node.
    subscribe_in_flight: bool,
}

impl HiveEntry {
    fn new(node: ServiceNode) -> Self {
        Self {
            node,
            state: ConnectionState::Disconnected,
            connection: None,
            consecutive_failures: 0,
            cooldown_until: None,
            subs: HashSet::new(),
            next: VecDeque::new(),
            subscribe_in_flight: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection(&self) -> Option<Arc<dyn SnodeConnection>> {
        self.connection.clone()
    }

    pub fn is_ready_to_connect(&self, now: i64) -> bool {
        self.state == ConnectionState::Disconnected
            && self.cooldown_until.map(|t| now >= t).unwrap_or(true)
    }

    pub fn begin_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// On success: resets the failure counter and every pending resubscribe timestamp to 0 so
    /// the next `check_subs` re-asserts the full subscription set.
    pub fn on_connect_success(&mut self, connection: Arc<dyn SnodeConnection>) {
        self.state = ConnectionState::Connected;
        self.connection = Some(connection);
        self.consecutive_failures = 0;
        self.cooldown_until = None;
        for entry in self.next.iter_mut() {
            if let Some((account, _)) = entry {
                *entry = Some((*account, 0));
            }
        }
    }

    pub fn on_connect_failure(&mut self, now: i64) {
        self.state = ConnectionState::Disconnected;
        self.connection = None;
        self.consecutive_failures += 1;
        self.cooldown_until = Some(now + cooldown_for(self.consecutive_failures) as i64);
    }

    pub fn on_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connection = None;
    }

    /// Adds an account to this node's subscription set. If already present and `force_now`,
    /// tombstones the existing pending entry and prepends a fresh immediate one.
    pub fn add_account(&mut self, account_id: [u8; 33], force_now: bool) {
        if self.subs.insert(account_id) {
            self.next.push_front(Some((account_id, 0)));
            return;
        }
        if force_now {
            for entry in self.next.iter_mut() {
                if matches!(entry, Some((a, _)) if *a == account_id) {
                    *entry = None;
                }
            }
            self.next.push_front(Some((account_id, 0)));
        }
    }

    /// Ejects accounts that `belongs_here` no longer maps to this node's swarm.
    pub fn recheck_swarm_members(&mut self, belongs_here: impl Fn(&[u8; 33]) -> bool) {
        let evicted: Vec<[u8; 33]> = self.subs.iter().filter(|a| !belongs_here(a)).copied().collect();
        for account in evicted {
            self.subs.remove(&account);
        }
        for entry in self.next.iter_mut() {
            if let Some((account, _)) = entry {
                if !belongs_here(account) {
                    *entry = None;
                }
            }
        }
    }

    pub fn member_accounts(&self) -> impl Iterator<Item = &[u8; 33]> {
        self.subs.iter()
    }

    /// Pops due accounts from the head of `next` (skipping tombstones) and asks
    /// `build_records` for each one's current subscribe records, stopping once the estimated
    /// serialized size would exceed `byte_budget`. Consumed accounts are re-appended with a
    /// fresh jittered `resubscribe_at`. Returns the combined record batch (empty if nothing was
    /// due or `subscribe_in_flight` is already set).
    pub fn check_subs(
        &mut self,
        now: i64,
        byte_budget: usize,
        mut build_records: impl FnMut([u8; 33]) -> Vec<(SubscribeRecord, usize)>,
    ) -> Vec<SubscribeRecord> {
        if self.state != ConnectionState::Connected || self.subscribe_in_flight {
            return Vec::new();
        }

        let mut batch = Vec::new();
        let mut size = 0usize;
        let mut consumed = Vec::new();

        while size < byte_budget {
            match self.next.front() {
                Some(Some((_, at))) if *at <= now => {}
                _ => break,
            }
            let Some(Some((account, _))) = self.next.pop_front() else {
                // a tombstone was popped above; continue draining
                continue;
            };

            for (record, record_size) in build_records(account) {
                batch.push(record);
                size += record_size;
            }
            consumed.push(account);
        }

        let mut rng = rand::thread_rng();
        for account in consumed {
            let jitter = rng.gen_range(RESUBSCRIBE_MIN_SECS..=RESUBSCRIBE_MAX_SECS);
            self.next.push_back(Some((account, now + jitter as i64)));
        }

        batch
    }

    pub fn set_subscribe_in_flight(&mut self, in_flight: bool) {
        self.subscribe_in_flight = in_flight;
    }

    pub fn has_due_entries(&self, now: i64) -> bool {
        self.next.iter().any(|e| matches!(e, Some((_, at)) if *at <= now))
    }
}

/// Owns one [`HiveEntry`] per known service node and the global connection-attempt pacing
/// counter.
pub struct Hive {
    entries: std::collections::HashMap<[u8; 32], HiveEntry>,
    pending_connects: u32,
    max_pending_connects: u32,
}

impl Hive {
    pub fn new(max_pending_connects: u32) -> Self {
        Self { entries: std::collections::HashMap::new(), pending_connects: 0, max_pending_connects }
    }

    pub fn add_node(&mut self, node: ServiceNode) {
        self.entries.entry(node.x25519_pubkey).or_insert_with(|| HiveEntry::new(node));
    }

    pub fn remove_node(&mut self, pubkey: &[u8; 32]) {
        self.entries.remove(pubkey);
    }

    pub fn entry(&self, pubkey: &[u8; 32]) -> Option<&HiveEntry> {
        self.entries.get(pubkey)
    }

    pub fn entry_mut(&mut self, pubkey: &[u8; 32]) -> Option<&mut HiveEntry> {
        self.entries.get_mut(pubkey)
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (&[u8; 32], &mut HiveEntry)> {
        self.entries.iter_mut().map(|(k, v)| (k, v))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8; 32], &HiveEntry)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Nodes eligible to start a connection attempt right now, respecting
    /// `max_pending_connects`. Marks each returned node as `Connecting` and reserves a pacing
    /// slot; callers must eventually call `release_connect_slot`.
    pub fn nodes_ready_to_connect(&mut self, now: i64) -> Vec<[u8; 32]> {
        let mut ready = Vec::new();
        let candidates: Vec<[u8; 32]> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_ready_to_connect(now))
            .map(|(k, _)| *k)
            .collect();

        for pubkey in candidates {
            if self.pending_connects >= self.max_pending_connects {
                break;
            }
            if let Some(entry) = self.entries.get_mut(&pubkey) {
                entry.begin_connecting();
                self.pending_connects += 1;
                ready.push(pubkey);
            }
        }
        ready
    }

    pub fn release_connect_slot(&mut self) {
        self.pending_connects = self.pending_connects.saturating_sub(1);
    }

    pub fn is_pacing_saturated(&self) -> bool {
        self.pending_connects >= self.max_pending_connects
    }
}
