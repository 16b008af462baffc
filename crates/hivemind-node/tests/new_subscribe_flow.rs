//! A fresh device subscribing to a service: validated against the notifier, persisted, and
//! reported as `added`; a second device whose wanted namespaces are already covered by the
//! first is reported as `added` too (a distinct `service_id`) but does not require separate
//! fan-out bookkeeping.

mod support;

use std::sync::Arc;

use hivemind_network::{DedupFilter, Hive};
use hivemind_node::Coordinator;
use hivemind_notify::NotifierBus;
use hivemind_proto::DecodedSubscribeRequest;
use hivemind_store::SubscriptionStore;
use support::{make_session_account, sign_monitor, FakeNotifierConnection, FakeOxend, FakeSnodeConnector};

struct MemoryPersistence(tokio::sync::Mutex<Vec<hivemind_store::PersistedSubscription>>);

#[async_trait::async_trait]
impl hivemind_store::SubscriptionPersistence for MemoryPersistence {
    async fn upsert(&self, row: &hivemind_store::PersistedSubscription) -> hivemind_store::Result<()> {
        let mut rows = self.0.lock().await;
        if let Some(existing) = rows.iter_mut().find(|r| r.account == row.account && r.service == row.service && r.service_id == row.service_id) {
            *existing = row.clone();
        } else {
            rows.push(row.clone());
        }
        Ok(())
    }
    async fn delete(&self, account: &[u8; 33], service: &str, service_id: &str) -> hivemind_store::Result<bool> {
        let mut rows = self.0.lock().await;
        let before = rows.len();
        rows.retain(|r| !(r.account == *account && r.service == service && r.service_id == service_id));
        Ok(rows.len() != before)
    }
    async fn load_all(&self, _now: i64, _expiry_secs: i64) -> hivemind_store::Result<Vec<hivemind_store::PersistedSubscription>> {
        Ok(self.0.lock().await.clone())
    }
    async fn delete_expired(&self, _now: i64, _expiry_secs: i64) -> hivemind_store::Result<u64> {
        Ok(0)
    }
}

fn make_coordinator() -> Arc<Coordinator> {
    let store = SubscriptionStore::new(Arc::new(MemoryPersistence(tokio::sync::Mutex::new(Vec::new()))));
    let hive = Hive::new(8);
    let topology = hivemind_network::SwarmTopology::new();
    let dedup = DedupFilter::new(600, 0);
    let mut bus = NotifierBus::new();
    bus.register_service("apns".into(), Arc::new(FakeNotifierConnection::new("a".repeat(40))));
    let connector = Arc::new(FakeSnodeConnector::default());
    let oxend = Arc::new(FakeOxend::new(Vec::new()));
    Coordinator::new(store, hive, topology, dedup, bus, connector, oxend, 1024 * 1024)
}

fn subscribe_request(namespaces: Vec<i16>, want_data: bool) -> (hivemind_core::Account, DecodedSubscribeRequest) {
    let (account, key) = make_session_account();
    let now = 1_700_000_000;
    let sig = sign_monitor(&account, &key, now, want_data, &namespaces);
    let req = DecodedSubscribeRequest {
        account_id: *account.id(),
        session_ed25519: Some(*account.ed25519_pubkey()),
        subkey_tag: None,
        namespaces,
        want_data,
        sig_ts: now,
        signature: sig,
        service: "apns".into(),
        service_info: serde_json::json!({"token": "abc"}),
        enc_key: [7u8; 32],
    };
    (account, req)
}

#[tokio::test]
async fn first_subscribe_is_validated_persisted_and_reported_as_added() {
    let coordinator = make_coordinator();
    let (_, req) = subscribe_request(vec![0, 1], true);

    let resp = coordinator.subscribe(req, 1_700_000_000).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.added, Some(true));
}

#[tokio::test]
async fn resubscribe_with_same_device_reports_updated() {
    let coordinator = make_coordinator();
    let (account, key) = make_session_account();
    let now = 1_700_000_000;

    let req1 = DecodedSubscribeRequest {
        account_id: *account.id(),
        session_ed25519: Some(*account.ed25519_pubkey()),
        subkey_tag: None,
        namespaces: vec![0, 1],
        want_data: false,
        sig_ts: now,
        signature: sign_monitor(&account, &key, now, false, &[0, 1]),
        service: "apns".into(),
        service_info: serde_json::json!({}),
        enc_key: [1u8; 32],
    };
    let first = coordinator.subscribe(req1, now).await.unwrap();
    assert_eq!(first.added, Some(true));

    let req2 = DecodedSubscribeRequest {
        account_id: *account.id(),
        session_ed25519: Some(*account.ed25519_pubkey()),
        subkey_tag: None,
        namespaces: vec![0, 1, 2],
        want_data: false,
        sig_ts: now + 1,
        signature: sign_monitor(&account, &key, now + 1, false, &[0, 1, 2]),
        service: "apns".into(),
        service_info: serde_json::json!({}),
        enc_key: [1u8; 32],
    };
    let second = coordinator.subscribe(req2, now + 1).await.unwrap();
    assert_eq!(second.updated, Some(true));
}
