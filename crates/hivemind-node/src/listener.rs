//! The authenticated RPC listener: one TCP port serving three kinds of inbound peer.
//!
//! Every connection opens with a one-byte cleartext tag identifying what follows, since the two
//! kinds of peer authenticate differently and neither can be told apart from the first
//! encrypted byte alone:
//!
//! - `TAG_CURVE` — the onion-request front-end (forwarding an already-decrypted client
//!   `subscribe`/`unsubscribe`, or an operator's `admin.*` call): sends its static X25519
//!   pubkey in the clear, then speaks the same length-prefixed
//!   `4-byte BE length || 24-byte nonce || ciphertext` framing as `hivemind_network::transport`,
//!   keyed by a session key derived from a Diffie-Hellman with our identity. The peer must
//!   appear in `listen_curve` (client-level) or `listen_curve_admin` (admin-level); unknown
//!   pubkeys are disconnected immediately.
//! - `TAG_NOTIFIER` — a notifier worker (apns/fcm/huawei/...): sends its service name in the
//!   clear, then speaks `hivemind_notify::connection`'s framing keyed by
//!   `derive_notifier_key(hivemind_secret, service_name)`, requiring no prior provisioning of a
//!   per-service key. Its first request is expected to be `admin.register_service`.
//!
//! Plaintext handshake bytes are a concession to needing *some* way to learn the peer's identity
//! before a session key exists; everything after the handshake is encrypted.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use hivemind_crypto::NodeKeyPair;
use hivemind_notify::{FramedNotifierConnection, WorkerRequest};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::request_router::RequestRouter;

const TAG_CURVE: u8 = 0;
const TAG_NOTIFIER: u8 = 1;
const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;
const MAX_SERVICE_NAME_LEN: usize = 64;
const CLIENT_SESSION_CONTEXT: &[u8] = b"OxenSSHivemindListener";

pub struct Listener {
    router: Arc<RequestRouter>,
    identity: Arc<NodeKeyPair>,
    hivemind_secret: [u8; 32],
    allowed_client: HashSet<[u8; 32]>,
    allowed_admin: HashSet<[u8; 32]>,
}

impl Listener {
    pub fn new(
        router: Arc<RequestRouter>,
        identity: Arc<NodeKeyPair>,
        allowed_client: Vec<[u8; 32]>,
        allowed_admin: Vec<[u8; 32]>,
    ) -> Self {
        let hivemind_secret = identity.secret_bytes();
        Self {
            router,
            identity,
            hivemind_secret,
            allowed_client: allowed_client.into_iter().collect(),
            allowed_admin: allowed_admin.into_iter().collect(),
        }
    }

    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "hivemind RPC listener ready");
        let shared = Arc::new(self);

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            stream.set_nodelay(true).ok();
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(err) = shared.handle_connection(stream, peer_addr).await {
                    tracing::debug!(error = %err, %peer_addr, "listener connection ended");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
        let mut tag = [0u8; 1];
        stream.read_exact(&mut tag).await?;

        match tag[0] {
            TAG_CURVE => self.handle_curve_connection(stream, peer_addr).await,
            TAG_NOTIFIER => self.handle_notifier_connection(stream, peer_addr).await,
            other => {
                anyhow::bail!("unrecognized connection tag {other} from {peer_addr}");
            }
        }
    }

    async fn handle_curve_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
        let mut peer_pubkey_bytes = [0u8; 32];
        stream.read_exact(&mut peer_pubkey_bytes).await?;

        let is_admin = self.allowed_admin.contains(&peer_pubkey_bytes);
        let is_client = is_admin || self.allowed_client.contains(&peer_pubkey_bytes);
        if !is_client {
            anyhow::bail!("connection from {peer_addr} presented an unlisted curve pubkey");
        }

        let peer_pubkey = x25519_dalek::PublicKey::from(peer_pubkey_bytes);
        let shared = self.identity.secret().diffie_hellman(&peer_pubkey);
        let session_key = hivemind_crypto::blake2b_256_keyed(CLIENT_SESSION_CONTEXT, shared.as_bytes());

        let (mut reader, mut writer) = stream.into_split();
        loop {
            let (method, body) = match read_request_frame(&mut reader, &session_key).await {
                Ok(frame) => frame,
                Err(_) => return Ok(()),
            };
            let reply = self.router.dispatch(&method, is_admin, &body).await;
            write_reply_frame(&mut writer, &session_key, &reply).await?;
        }
    }

    async fn handle_notifier_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
        let mut name_len_buf = [0u8; 1];
        stream.read_exact(&mut name_len_buf).await?;
        let name_len = name_len_buf[0] as usize;
        if name_len == 0 || name_len > MAX_SERVICE_NAME_LEN {
            anyhow::bail!("notifier handshake from {peer_addr} carried an invalid name length");
        }
        let mut name_buf = vec![0u8; name_len];
        stream.read_exact(&mut name_buf).await?;
        let name = String::from_utf8(name_buf)?;

        let session_key = hivemind_crypto::derive_notifier_key(&self.hivemind_secret, &name);
        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<WorkerRequest>();
        let conn = Arc::new(FramedNotifierConnection::new(stream, session_key, worker_tx));
        self.router.coordinator().register_service(name.clone(), conn.clone()).await;
        tracing::info!(service = %name, %peer_addr, "notifier worker connected");

        while let Some(WorkerRequest { method, body, reply }) = worker_rx.recv().await {
            let response = self.router.handle_worker_request(&name, &method, &body).await;
            let _ = reply.send(response);
        }
        Ok(())
    }
}

fn cipher_for(session_key: &[u8; 32]) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(session_key.into())
}

fn encrypt_frame(session_key: &[u8; 32], method: Option<&str>, body: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(1 + method.map(str::len).unwrap_or(0) + body.len());
    match method {
        Some(m) => {
            plaintext.push(m.len() as u8);
            plaintext.extend_from_slice(m.as_bytes());
        }
        None => plaintext.push(0),
    }
    plaintext.extend_from_slice(body);

    let mut nonce_bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher_for(session_key)
        .encrypt(nonce, plaintext.as_ref())
        .expect("XChaCha20-Poly1305 encryption is infallible for in-memory buffers");

    let mut framed = Vec::with_capacity(4 + 24 + ciphertext.len());
    framed.extend_from_slice(&((24 + ciphertext.len()) as u32).to_be_bytes());
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(&ciphertext);
    framed
}

fn decrypt_frame(session_key: &[u8; 32], frame: &[u8]) -> anyhow::Result<(Option<String>, Vec<u8>)> {
    if frame.len() < 24 {
        anyhow::bail!("frame too short");
    }
    let (nonce_bytes, ciphertext) = frame.split_at(24);
    let nonce = XNonce::from_slice(nonce_bytes);
    let plaintext = cipher_for(session_key)
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("frame decryption failed"))?;

    if plaintext.is_empty() {
        anyhow::bail!("empty frame");
    }
    let method_len = plaintext[0] as usize;
    if plaintext.len() < 1 + method_len {
        anyhow::bail!("truncated method name");
    }
    let method = if method_len > 0 {
        Some(String::from_utf8_lossy(&plaintext[1..1 + method_len]).into_owned())
    } else {
        None
    };
    Ok((method, plaintext[1 + method_len..].to_vec()))
}

async fn read_raw_frame(reader: &mut OwnedReadHalf) -> anyhow::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame exceeds maximum size");
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn read_request_frame(reader: &mut OwnedReadHalf, session_key: &[u8; 32]) -> anyhow::Result<(String, Vec<u8>)> {
    let raw = read_raw_frame(reader).await?;
    let (method, body) = decrypt_frame(session_key, &raw)?;
    let method = method.ok_or_else(|| anyhow::anyhow!("request frame carried no method name"))?;
    Ok((method, body))
}

async fn write_reply_frame(writer: &mut OwnedWriteHalf, session_key: &[u8; 32], body: &[u8]) -> anyhow::Result<()> {
    let framed = encrypt_frame(session_key, None, body);
    writer.write_all(&framed).await?;
    Ok(())
}
