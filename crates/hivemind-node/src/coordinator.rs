//! The hivemind coordinator: one reentrant lock guarding `SubscriptionStore`, `SwarmTopology`,
//! `Hive`, `DedupFilter`, and `NotifierBus`.
//!
//! Every public method here follows the suspension-point pattern the pieces it wraps already
//! document: acquire the lock, do whatever pure bookkeeping is needed, clone out anything an
//! outbound RPC or DB write will need, drop the guard, await the I/O, then (if the outcome needs
//! recording) re-acquire the lock. The lock is never held across a `notifier.validate` round
//! trip, a snode connect/request, or an oxend poll.

use std::sync::Arc;
use std::time::Duration;

use hivemind_core::{now_unix, Account, CoreError, Subscription};
use hivemind_network::{filter_value, ConnectionState, DedupFilter, Hive, SnodeConnector, SwarmTopology};
use hivemind_notify::{NotifierBus, NotifyError, SharedConnection, DEFAULT_VALIDATE_TIMEOUT};
use hivemind_proto::{
    encode_monitor_messages, DecodedSubscribeRequest, DecodedUnsubscribeRequest, NotifyMessage, PushEnvelope,
    SubscribeRecord, SuccessResponse,
};
use hivemind_store::{RemoveOutcome, SubscriptionStore};
use serde_bytes::ByteBuf;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::oxend::OxendClient;

/// Timeout for a single outbound connection attempt to a service node.
pub const SNODE_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for a `monitor.messages` request/reply round trip.
pub const SNODE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the connection pump wakes to dial pending nodes and flush due resubscribes.
const PUMP_TICK: Duration = Duration::from_secs(1);

/// Errors surfaced by Coordinator methods to the RequestRouter, carrying enough information to
/// map onto the wire-level `SubscribeCode` taxonomy.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Proto(#[from] hivemind_proto::ProtoError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Store(#[from] hivemind_store::StoreError),
}

impl RouterError {
    pub fn code(&self) -> hivemind_core::SubscribeCode {
        use hivemind_core::SubscribeCode;
        match self {
            RouterError::Core(_) | RouterError::Proto(_) => SubscribeCode::BadInput,
            RouterError::Notify(NotifyError::ServiceNotAvailable(_)) => SubscribeCode::ServiceNotAvailable,
            RouterError::Notify(NotifyError::ValidateTimeout) => SubscribeCode::ServiceTimeout,
            RouterError::Notify(_) => SubscribeCode::Error,
            RouterError::Store(_) => SubscribeCode::Error,
        }
    }
}

struct Inner {
    store: SubscriptionStore,
    hive: Hive,
    topology: SwarmTopology,
    dedup: DedupFilter,
    bus: NotifierBus,
    notifications_count: u64,
}

/// The hivemind core: wraps every piece of mutable state behind one lock and drives the
/// background connection pump and inbound-notify drain loop.
pub struct Coordinator {
    inner: Mutex<Inner>,
    connector: Arc<dyn SnodeConnector>,
    oxend: Arc<dyn OxendClient>,
    subs_request_limit: usize,
    started_at: i64,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SubscriptionStore,
        hive: Hive,
        topology: SwarmTopology,
        dedup: DedupFilter,
        bus: NotifierBus,
        connector: Arc<dyn SnodeConnector>,
        oxend: Arc<dyn OxendClient>,
        subs_request_limit: usize,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            inner: Mutex::new(Inner { store, hive, topology, dedup, bus, notifications_count: 0 }),
            connector,
            oxend,
            subs_request_limit,
            started_at: now_unix(),
        });

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        coordinator.clone().spawn_notify_drain(inbound_rx);
        coordinator.clone().spawn_connection_pump(inbound_tx);

        coordinator
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    // ---- subscribe / unsubscribe -------------------------------------------------------

    /// Validates with the notifier, stores the subscription, and fans it out to the account's
    /// swarm if needed.
    pub async fn subscribe(&self, req: DecodedSubscribeRequest, now: i64) -> Result<SuccessResponse, RouterError> {
        let account = Account::new(req.account_id, req.session_ed25519)?;

        let conn = {
            let inner = self.inner.lock().await;
            inner.bus.connection(&req.service)?
        };
        let validate_body = {
            let inner = self.inner.lock().await;
            inner.bus.build_validate_request(&req.service, &req.service_info)?
        };
        let raw_reply = conn.validate(validate_body, DEFAULT_VALIDATE_TIMEOUT).await.map_err(RouterError::Notify)?;
        let (svc_id, svc_data) = {
            let inner = self.inner.lock().await;
            inner.bus.interpret_validate_reply(&req.service, &raw_reply)?
        };

        let sub = Subscription::new(
            &account,
            req.subkey_tag,
            req.namespaces,
            req.want_data,
            req.sig_ts,
            req.signature,
            req.enc_key,
            req.service.clone(),
            svc_id,
            svc_data.unwrap_or_default(),
            now,
        )?;

        let outcome = {
            let mut inner = self.inner.lock().await;
            let outcome = inner.store.add_subscription(account.clone(), sub).await?;
            if outcome.needs_fanout {
                let members = members_for_account(&mut inner, account.id());
                for pubkey in members {
                    if let Some(entry) = inner.hive.entry_mut(&pubkey) {
                        entry.add_account(*account.id(), true);
                    }
                }
            }
            outcome
        };

        Ok(if outcome.replaced_existing {
            SuccessResponse::updated("subscription updated")
        } else {
            SuccessResponse::added("subscription added")
        })
    }

    pub async fn unsubscribe(&self, req: DecodedUnsubscribeRequest, now: i64) -> Result<SuccessResponse, RouterError> {
        let account = {
            let inner = self.inner.lock().await;
            match inner.store.account(&req.account_id) {
                Some(a) => a.clone(),
                None => Account::new(req.account_id, req.session_ed25519)?,
            }
        };

        hivemind_core::verify_unsubscribe(&account, req.subkey_tag.as_ref(), req.sig_ts, &req.signature, now)?;

        let mut inner = self.inner.lock().await;
        let outcome = inner.store.remove_subscription(&req.account_id, &req.service, &req.service_id).await?;
        Ok(SuccessResponse::removed(matches!(outcome, RemoveOutcome::Removed), "unsubscribed"))
    }

    // ---- notifier registry --------------------------------------------------------------

    pub async fn register_service(&self, name: String, conn: SharedConnection) {
        let mut inner = self.inner.lock().await;
        inner.bus.register_service(name, conn);
    }

    pub async fn record_stats_report(&self, service: &str, raw: &[u8]) -> Result<(), RouterError> {
        let mut inner = self.inner.lock().await;
        inner.bus.record_stats_report(service, raw)?;
        Ok(())
    }

    pub async fn is_service_registered(&self, name: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.bus.is_registered(name)
    }

    // ---- inbound notify.message (arriving via Hive's own snode connections) -------------

    /// Handles one `notify.message` arrival, whichever path it came in by: Hive's own snode
    /// connections (`_from_node` identifies the reporting node) or the RequestRouter's
    /// `notify.message` callback endpoint, where `_from_node` is unused.
    pub async fn handle_notify_message(&self, _from_node: [u8; 32], msg: NotifyMessage, now: i64) {
        let Some(account_id) = msg.account_id() else { return };
        let msg_hash = msg.msg_hash.to_vec();

        let to_push: Vec<(SharedConnection, Vec<u8>)> = {
            let mut inner = self.inner.lock().await;
            let matching: Vec<Subscription> = inner
                .store
                .valid_subscriptions_for(&account_id, now)
                .into_iter()
                .filter(|s| s.namespaces.contains(&(msg.namespace as i16)))
                .cloned()
                .collect();

            let mut out = Vec::with_capacity(matching.len());
            for sub in matching {
                let filter_val = filter_value(&sub.service, &sub.service_id, &msg_hash);
                if inner.dedup.check_and_insert(filter_val, now) {
                    continue;
                }
                let Ok(conn) = inner.bus.connection(&sub.service) else { continue };
                let envelope = PushEnvelope {
                    service: sub.service.clone(),
                    svc_id: ByteBuf::from(sub.service_id.clone().into_bytes()),
                    svc_data: (!sub.service_data.is_empty()).then(|| ByteBuf::from(sub.service_data.clone())),
                    enc_key: ByteBuf::from(sub.enc_key.to_vec()),
                    msg_hash: ByteBuf::from(msg_hash.clone()),
                    account: ByteBuf::from(account_id.to_vec()),
                    namespace: msg.namespace,
                    timestamp: msg.timestamp,
                    expiry: msg.expiry,
                    body: if sub.want_data { msg.body.clone() } else { None },
                };
                let Ok(encoded) = envelope.encode() else { continue };
                out.push((conn, encoded));
                inner.notifications_count += 1;
            }
            out
        };

        for (conn, body) in to_push {
            if let Err(err) = conn.push(body).await {
                tracing::warn!(error = %err, "notifier push failed");
            }
        }
    }

    // ---- topology refresh (BlockWatcher-driven or periodic) ------------------------------

    /// Polls the daemon for the current service-node list and applies it. A failed
    /// poll is logged and leaves the topology untouched.
    pub async fn refresh_topology(&self) {
        let entries = match self.oxend.get_service_nodes().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "swarm topology refresh: daemon poll failed, state left unchanged");
                return;
            }
        };
        // The chain head is best-effort: a failed `get_info` still lets the service-node list
        // refresh proceed, it just leaves `block_hash`/`block_height` at their prior value.
        let chain_info = self.oxend.get_info().await.ok();

        let mut inner = self.inner.lock().await;
        let Inner { store, hive, topology, .. } = &mut *inner;

        let outcome = topology.refresh(&entries);
        if let Some(info) = chain_info {
            topology.block_hash = Some(info.block_hash);
            topology.block_height = Some(info.height);
        }

        for node in &outcome.to_connect {
            hive.add_node(node.clone());
        }
        for node in &outcome.to_disconnect {
            if let Some(entry) = hive.entry_mut(&node.x25519_pubkey) {
                entry.on_disconnect();
            }
            hive.remove_node(&node.x25519_pubkey);
        }

        if outcome.swarms_changed {
            let moved = topology.rebalance_accounts(store.accounts_mut());

            for (pubkey, entry) in hive.entries_mut() {
                let want_swarm = topology.node(pubkey).map(|n| n.swarm_id);
                entry.recheck_swarm_members(|account_id| {
                    store.account(account_id).and_then(|a| a.swarm()) == want_swarm
                });
            }

            for account_id in moved {
                let members = store
                    .account(&account_id)
                    .and_then(|a| a.swarm())
                    .and_then(|swarm_id| topology.swarm_members(swarm_id))
                    .cloned()
                    .unwrap_or_default();
                for pubkey in members {
                    if let Some(entry) = hive.entry_mut(&pubkey) {
                        entry.add_account(account_id, true);
                    }
                }
            }
        }
    }

    /// Drops every subscription whose signature has aged out.
    pub async fn expire_subscriptions(&self, now: i64, expiry_secs: i64) {
        let mut inner = self.inner.lock().await;
        match inner.store.expire_old(now, expiry_secs).await {
            Ok(removed) if removed > 0 => tracing::info!(removed, "expired stale subscriptions"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "subscription expiry sweep failed"),
        }
    }

    // ---- stats -----------------------------------------------

    pub async fn get_stats(&self) -> serde_json::Value {
        let mut inner = self.inner.lock().await;
        let account_ids: Vec<[u8; 33]> = inner.store.accounts_mut().map(|a| *a.id()).collect();
        let accounts = account_ids.len();
        let subscriptions: usize = account_ids.iter().map(|id| inner.store.subscriptions_for(id).len()).sum();
        let connections = inner.hive.entries().filter(|(_, e)| e.state() == ConnectionState::Connected).count();
        let swarms = inner.topology.swarm_ids().len();
        let snodes = inner.topology.nodes().count();

        let notifiers: serde_json::Map<String, serde_json::Value> = inner
            .bus
            .all_stats()
            .map(|(name, stats)| {
                let values: serde_json::Map<String, serde_json::Value> = stats
                    .snapshot()
                    .iter()
                    .map(|(k, v)| {
                        let value = match v {
                            hivemind_proto::StatValue::Int(i) => serde_json::json!(i),
                            hivemind_proto::StatValue::Text(s) => serde_json::json!(s),
                        };
                        (k.clone(), value)
                    })
                    .collect();
                (name.to_string(), serde_json::Value::Object(values))
            })
            .collect();

        serde_json::json!({
            "block_hash": inner.topology.block_hash,
            "block_height": inner.topology.block_height,
            "swarms": swarms,
            "snodes": snodes,
            "connections": connections,
            "accounts": accounts,
            "subscriptions": subscriptions,
            "notifications": inner.notifications_count,
            "uptime": now_unix() - self.started_at,
            "notifiers": notifiers,
        })
    }

    // ---- background tasks ----------------------------------------------------------------

    fn spawn_notify_drain(
        self: Arc<Self>,
        mut inbound_rx: mpsc::UnboundedReceiver<([u8; 32], NotifyMessage)>,
    ) {
        tokio::spawn(async move {
            while let Some((node_pubkey, msg)) = inbound_rx.recv().await {
                self.handle_notify_message(node_pubkey, msg, now_unix()).await;
            }
        });
    }

    /// Drives Hive: dials nodes `nodes_ready_to_connect` surfaces, and flushes due resubscribe
    /// batches for already-connected ones, forever, on `PUMP_TICK`.
    fn spawn_connection_pump(self: Arc<Self>, inbound_tx: mpsc::UnboundedSender<([u8; 32], NotifyMessage)>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PUMP_TICK);
            loop {
                ticker.tick().await;
                let now = now_unix();

                let to_dial: Vec<hivemind_core::ServiceNode> = {
                    let mut inner = self.inner.lock().await;
                    inner
                        .hive
                        .nodes_ready_to_connect(now)
                        .into_iter()
                        .filter_map(|pubkey| inner.hive.entry(&pubkey).map(|e| e.node.clone()))
                        .collect()
                };
                for node in to_dial {
                    let coordinator = self.clone();
                    let inbound_tx = inbound_tx.clone();
                    tokio::spawn(async move {
                        coordinator.dial_one(node, inbound_tx).await;
                    });
                }

                self.flush_due_resubscribes(now).await;
            }
        });
    }

    async fn dial_one(
        self: Arc<Self>,
        node: hivemind_core::ServiceNode,
        inbound_tx: mpsc::UnboundedSender<([u8; 32], NotifyMessage)>,
    ) {
        let now = now_unix();
        match self.connector.connect(&node, SNODE_CONNECT_TIMEOUT, inbound_tx).await {
            Ok(connection) => {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.hive.entry_mut(&node.x25519_pubkey) {
                    entry.on_connect_success(connection);
                }
                inner.hive.release_connect_slot();
            }
            Err(err) => {
                tracing::warn!(error = %err, node = %node.address(), "snode connection attempt failed");
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.hive.entry_mut(&node.x25519_pubkey) {
                    entry.on_connect_failure(now);
                }
                inner.hive.release_connect_slot();
            }
        }
    }

    async fn flush_due_resubscribes(&self, now: i64) {
        let batches: Vec<([u8; 32], Arc<dyn hivemind_network::SnodeConnection>, Vec<SubscribeRecord>)> = {
            let mut inner = self.inner.lock().await;
            let Inner { store, hive, .. } = &mut *inner;
            let subs_request_limit = self.subs_request_limit;

            let mut out = Vec::new();
            for (pubkey, entry) in hive.entries_mut() {
                if !entry.has_due_entries(now) {
                    continue;
                }
                let Some(connection) = entry.connection() else { continue };
                let batch = entry.check_subs(now, subs_request_limit, |account_id| {
                    let account = match store.account(&account_id) {
                        Some(a) => a,
                        None => return Vec::new(),
                    };
                    store
                        .valid_subscriptions_for(&account_id, now)
                        .into_iter()
                        .map(|sub| {
                            let record = SubscribeRecord::new(
                                &account_id,
                                account.ed25519_pubkey(),
                                sub.subkey_tag.as_ref(),
                                sub.want_data,
                                &sub.namespaces,
                                &sub.signature,
                                sub.sig_ts,
                            );
                            let size = SubscribeRecord::estimated_bytes(
                                sub.namespaces.len(),
                                sub.subkey_tag.is_some(),
                                sub.want_data,
                            );
                            (record, size)
                        })
                        .collect()
                });
                if batch.is_empty() {
                    continue;
                }
                entry.set_subscribe_in_flight(true);
                out.push((*pubkey, connection, batch));
            }
            out
        };

        for (pubkey, connection, batch) in batches {
            let body = match encode_monitor_messages(&batch) {
                Ok(b) => b,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode monitor.messages batch");
                    let mut inner = self.inner.lock().await;
                    if let Some(entry) = inner.hive.entry_mut(&pubkey) {
                        entry.set_subscribe_in_flight(false);
                    }
                    continue;
                }
            };

            let result = connection.request("monitor.messages", body, SNODE_REQUEST_TIMEOUT).await;
            let mut inner = self.inner.lock().await;
            if let Some(entry) = inner.hive.entry_mut(&pubkey) {
                entry.set_subscribe_in_flight(false);
                if let Err(err) = result {
                    tracing::warn!(error = %err, "monitor.messages request failed");
                    if matches!(err, hivemind_network::NetworkError::Closed) {
                        entry.on_disconnect();
                    }
                }
            }
        }
    }
}

/// Ensures `account_id`'s swarm placement is current (placing it for the first time if
/// necessary) and returns the x25519 pubkeys of its swarm's members.
fn members_for_account(inner: &mut Inner, account_id: &[u8; 33]) -> Vec<[u8; 32]> {
    let swarm_ids = inner.topology.swarm_ids().to_vec();
    if swarm_ids.is_empty() {
        return Vec::new();
    }

    let swarm_id = match inner.store.account(account_id).and_then(|a| a.swarm()) {
        Some(id) => Some(id),
        None => {
            let mut placed = None;
            for account in inner.store.accounts_mut() {
                if account.id() == account_id {
                    account.update_swarm(&swarm_ids);
                    placed = account.swarm();
                    break;
                }
            }
            placed
        }
    };

    match swarm_id {
        Some(id) => inner.topology.swarm_members(id).map(|m| m.iter().copied().collect()).unwrap_or_default(),
        None => Vec::new(),
    }
}
