//! A topology refresh that changes the swarm id set re-places every tracked account and asserts
//! it onto its new swarm's `Hive` entries, so a later resubscribe batch goes to the right nodes.

mod support;

use std::sync::Arc;

use hivemind_network::{DedupFilter, Hive, RawNodeEntry};
use hivemind_node::Coordinator;
use hivemind_notify::NotifierBus;
use hivemind_proto::DecodedSubscribeRequest;
use hivemind_store::SubscriptionStore;
use support::{make_session_account, sign_monitor, FakeNotifierConnection, FakeOxend, FakeSnodeConnector};

#[derive(Default)]
struct MemoryPersistence(tokio::sync::Mutex<Vec<hivemind_store::PersistedSubscription>>);

#[async_trait::async_trait]
impl hivemind_store::SubscriptionPersistence for MemoryPersistence {
    async fn upsert(&self, row: &hivemind_store::PersistedSubscription) -> hivemind_store::Result<()> {
        self.0.lock().await.push(row.clone());
        Ok(())
    }
    async fn delete(&self, _account: &[u8; 33], _service: &str, _service_id: &str) -> hivemind_store::Result<bool> {
        Ok(false)
    }
    async fn load_all(&self, _now: i64, _expiry_secs: i64) -> hivemind_store::Result<Vec<hivemind_store::PersistedSubscription>> {
        Ok(self.0.lock().await.clone())
    }
    async fn delete_expired(&self, _now: i64, _expiry_secs: i64) -> hivemind_store::Result<u64> {
        Ok(0)
    }
}

fn node_entry(pubkey_byte: u8, swarm_id: u64) -> RawNodeEntry {
    RawNodeEntry { x25519_pubkey: [pubkey_byte; 32], host: format!("10.0.0.{pubkey_byte}"), port: 22021, swarm_id }
}

#[tokio::test]
async fn losing_a_swarm_reassigns_its_accounts_to_the_survivor() {
    let store = SubscriptionStore::new(Arc::new(MemoryPersistence::default()));
    let hive = Hive::new(8);
    let topology = hivemind_network::SwarmTopology::new();
    let dedup = DedupFilter::new(600, 0);
    let mut bus = NotifierBus::new();
    bus.register_service("apns".into(), Arc::new(FakeNotifierConnection::new("a".repeat(40))));
    let connector = Arc::new(FakeSnodeConnector::default());
    let oxend = Arc::new(FakeOxend::new(vec![node_entry(1, 10), node_entry(2, 20)]));
    let coordinator = Coordinator::new(store, hive, topology, dedup, bus, connector.clone(), oxend.clone(), 1024 * 1024);

    coordinator.refresh_topology().await;
    assert_eq!(coordinator.get_stats().await["swarms"], serde_json::json!(2));

    let (account, key) = make_session_account();
    let now = 1_700_000_000;
    let req = DecodedSubscribeRequest {
        account_id: *account.id(),
        session_ed25519: Some(*account.ed25519_pubkey()),
        subkey_tag: None,
        namespaces: vec![0],
        want_data: false,
        sig_ts: now,
        signature: sign_monitor(&account, &key, now, false, &[0]),
        service: "apns".into(),
        service_info: serde_json::json!({}),
        enc_key: [1u8; 32],
    };
    coordinator.subscribe(req, now).await.unwrap();

    // Node 2 (swarm 20) drops out of the daemon's service-node list entirely: its swarm
    // disappears, so every account it held must be re-placed onto the sole remaining swarm.
    oxend.set_entries(vec![node_entry(1, 10)]);
    coordinator.refresh_topology().await;

    let stats = coordinator.get_stats().await;
    assert_eq!(stats["swarms"], serde_json::json!(1));
    assert_eq!(stats["snodes"], serde_json::json!(1));

    // node 2 was never actually dialed by this test (the connection pump runs on its own
    // tick), but the topology itself must have dropped it.
    assert!(connector.connections.lock().unwrap().get(&[2u8; 32]).is_none());
}

#[tokio::test]
async fn disconnecting_node_is_marked_and_removed_from_hive() {
    let store = SubscriptionStore::new(Arc::new(MemoryPersistence::default()));
    let hive = Hive::new(8);
    let topology = hivemind_network::SwarmTopology::new();
    let dedup = DedupFilter::new(600, 0);
    let mut bus = NotifierBus::new();
    bus.register_service("apns".into(), Arc::new(FakeNotifierConnection::new("a".repeat(40))));
    let connector = Arc::new(FakeSnodeConnector::default());
    let oxend = Arc::new(FakeOxend::new(vec![node_entry(1, 10)]));
    let coordinator = Coordinator::new(store, hive, topology, dedup, bus, connector, oxend.clone(), 1024 * 1024);

    coordinator.refresh_topology().await;
    assert_eq!(coordinator.get_stats().await["snodes"], serde_json::json!(1));

    oxend.set_entries(vec![]);
    coordinator.refresh_topology().await;

    let stats = coordinator.get_stats().await;
    assert_eq!(stats["snodes"], serde_json::json!(0));
    assert_eq!(stats["connections"], serde_json::json!(0));
}
