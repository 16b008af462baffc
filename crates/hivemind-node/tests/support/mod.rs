//! Shared fakes for the coordinator-level scenario tests: an in-memory oxend, snode connector,
//! and notifier connection, all built against the public traits the real transports implement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use hivemind_core::Account;
use hivemind_network::{NetworkError, RawNodeEntry, SnodeConnection, SnodeConnector};
use hivemind_node::oxend::{ChainInfo, OxendClient, OxendError};
use hivemind_notify::{NotifierConnection, NotifyError};
use tokio::sync::mpsc;

/// An `OxendClient` whose service-node list a test can swap out between polls, to drive
/// successive `refresh_topology` calls through different topologies.
pub struct FakeOxend {
    pub entries: Mutex<Vec<RawNodeEntry>>,
}

impl FakeOxend {
    pub fn new(entries: Vec<RawNodeEntry>) -> Self {
        Self { entries: Mutex::new(entries) }
    }

    pub fn set_entries(&self, entries: Vec<RawNodeEntry>) {
        *self.entries.lock().unwrap() = entries;
    }
}

#[async_trait]
impl OxendClient for FakeOxend {
    async fn get_info(&self) -> Result<ChainInfo, OxendError> {
        Ok(ChainInfo { height: 1, block_hash: "deadbeef".into() })
    }

    async fn get_service_nodes(&self) -> Result<Vec<RawNodeEntry>, OxendError> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

/// A snode connection that records every `monitor.messages` batch sent to it.
pub struct FakeSnodeConnection {
    pub sent: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl SnodeConnection for FakeSnodeConnection {
    async fn request(&self, method: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, NetworkError> {
        self.sent.lock().unwrap().push((method.to_string(), body));
        Ok(Vec::new())
    }

    async fn send(&self, method: &str, body: Vec<u8>) -> Result<(), NetworkError> {
        self.sent.lock().unwrap().push((method.to_string(), body));
        Ok(())
    }
}

/// Hands back the same [`FakeSnodeConnection`] for every node, so a test can inspect what was
/// sent to "the swarm" without caring which member happened to receive it.
#[derive(Default)]
pub struct FakeSnodeConnector {
    pub connections: Mutex<HashMap<[u8; 32], Arc<FakeSnodeConnection>>>,
}

#[async_trait]
impl SnodeConnector for FakeSnodeConnector {
    async fn connect(
        &self,
        node: &hivemind_core::ServiceNode,
        _timeout: Duration,
        _inbound: mpsc::UnboundedSender<([u8; 32], hivemind_proto::NotifyMessage)>,
    ) -> Result<Arc<dyn SnodeConnection>, NetworkError> {
        let conn = self
            .connections
            .lock()
            .unwrap()
            .entry(node.x25519_pubkey)
            .or_insert_with(|| Arc::new(FakeSnodeConnection { sent: Mutex::new(Vec::new()) }))
            .clone();
        Ok(conn)
    }
}

/// A notifier connection that answers every `validate` with a fixed, well-formed `svc_id` and
/// records every `push` body it receives.
pub struct FakeNotifierConnection {
    pub svc_id: String,
    pub pushed: Mutex<Vec<Vec<u8>>>,
}

impl FakeNotifierConnection {
    pub fn new(svc_id: impl Into<String>) -> Self {
        Self { svc_id: svc_id.into(), pushed: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl NotifierConnection for FakeNotifierConnection {
    async fn validate(&self, _body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, NotifyError> {
        let parts = (
            serde_bytes::ByteBuf::from(b"0".to_vec()),
            serde_bytes::ByteBuf::from(self.svc_id.clone().into_bytes()),
        );
        Ok(serde_bencode::ser::to_bytes(&parts).unwrap())
    }

    async fn push(&self, body: Vec<u8>) -> Result<(), NotifyError> {
        self.pushed.lock().unwrap().push(body);
        Ok(())
    }
}

/// Builds a Session-ID account (`0x05` prefix) plus the Ed25519 signing key behind it.
pub fn make_session_account() -> (Account, SigningKey) {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let ed = *signing_key.verifying_key().as_bytes();
    let x25519 = hivemind_crypto::ed25519_pubkey_to_x25519(&ed).unwrap();
    let mut id = [0u8; 33];
    id[0] = hivemind_core::SESSION_ID_PREFIX;
    id[1..].copy_from_slice(&x25519);
    (Account::new(id, Some(ed)).unwrap(), signing_key)
}

pub fn sign_monitor(account: &Account, key: &SigningKey, sig_ts: i64, want_data: bool, namespaces: &[i16]) -> [u8; 64] {
    let msg = hivemind_crypto::monitor_sig_message(account.id(), sig_ts, want_data, namespaces);
    key.sign(&msg).to_bytes()
}

pub fn sign_unsubscribe(account: &Account, key: &SigningKey, sig_ts: i64) -> [u8; 64] {
    let msg = hivemind_crypto::unsubscribe_sig_message(account.id(), sig_ts);
    key.sign(&msg).to_bytes()
}
