//! The authenticated per-snode connection abstraction that Hive drives.
//!
//! Kept as a trait so Hive's state machine and batching logic can be exercised against an
//! in-memory fake (no sockets) in tests, with [`TcpSnodeConnector`] providing the real
//! length-prefixed, encrypted TCP implementation used in production.
//!
//! A connection is full-duplex over one socket, oxenmq-style: our side issues
//! `monitor.messages` requests and awaits a reply, while the snode independently pushes
//! unsolicited `notify.message` notifications down the same pipe at any time. A background
//! reader task demultiplexes the two by a one-byte frame tag so the coordinator never has to
//! poll per-connection; unsolicited notifications are instead funneled into one shared queue
//! handed to [`SnodeConnector::connect`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use hivemind_core::ServiceNode;
use hivemind_proto::NotifyMessage;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{NetworkError, Result};

const SESSION_KEY_CONTEXT: &[u8] = b"OxenSSHivemindSession";
const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

/// Frame tags distinguishing the two message kinds multiplexed over one connection.
const TAG_REQUEST_REPLY: u8 = 0;
const TAG_NOTIFY: u8 = 1;

/// A single open, authenticated connection to one service node.
#[async_trait]
pub trait SnodeConnection: Send + Sync {
    /// Issues one request (an oxenmq-style `category.method` name plus a pre-encoded body) and
    /// awaits its reply, or `NetworkError::Timeout` if `timeout` elapses first.
    async fn request(&self, method: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>>;

    /// A one-way message with no expected reply (used for `monitor.messages` fire-and-forget
    /// retries where the caller does not want to block on a round-trip).
    async fn send(&self, method: &str, body: Vec<u8>) -> Result<()>;
}

/// Establishes new [`SnodeConnection`]s. Implementations perform whatever handshake/auth the
/// transport requires before returning a usable connection.
#[async_trait]
pub trait SnodeConnector: Send + Sync {
    /// `inbound` receives every `notify.message` the snode pushes on this connection, tagged
    /// with the originating node's pubkey so a coordinator can fan all connections into one
    /// receive loop instead of polling per connection.
    async fn connect(
        &self,
        node: &ServiceNode,
        timeout: Duration,
        inbound: mpsc::UnboundedSender<([u8; 32], NotifyMessage)>,
    ) -> Result<Arc<dyn SnodeConnection>>;
}

/// TCP transport framing each request/reply/notify as `4-byte BE length || 24-byte nonce ||
/// ciphertext`, encrypted under a session key derived from an X25519 Diffie-Hellman with the
/// node's advertised key. The plaintext inside the ciphertext is `[tag:1][payload...]`: for a
/// request/reply, `payload` is `[method_len:1][method][body]`; for a notify, `payload` is the
/// raw bencoded `notify.message` dict.
pub struct TcpSnodeConnector {
    identity: x25519_dalek::StaticSecret,
}

impl TcpSnodeConnector {
    pub fn new(identity: x25519_dalek::StaticSecret) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl SnodeConnector for TcpSnodeConnector {
    async fn connect(
        &self,
        node: &ServiceNode,
        timeout: Duration,
        inbound: mpsc::UnboundedSender<([u8; 32], NotifyMessage)>,
    ) -> Result<Arc<dyn SnodeConnection>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(node.address()))
            .await
            .map_err(|_| NetworkError::Timeout)??;
        stream.set_nodelay(true).ok();

        let their_pubkey = x25519_dalek::PublicKey::from(node.x25519_pubkey);
        let shared = self.identity.diffie_hellman(&their_pubkey);
        let session_key = hivemind_crypto::blake2b_256_keyed(SESSION_KEY_CONTEXT, shared.as_bytes());

        let (read_half, write_half) = stream.into_split();
        let pending_reply: Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>> = Arc::new(Mutex::new(None));

        let connection = Arc::new(TcpConnection {
            writer: Mutex::new(write_half),
            session_key,
            pending_reply: pending_reply.clone(),
        });

        let node_pubkey = node.x25519_pubkey;
        tokio::spawn(read_loop(read_half, session_key, pending_reply, inbound, node_pubkey));

        Ok(connection)
    }
}

struct TcpConnection {
    writer: Mutex<OwnedWriteHalf>,
    session_key: [u8; 32],
    pending_reply: Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>>,
}

fn cipher_for(session_key: &[u8; 32]) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(session_key.into())
}

fn encrypt_frame(session_key: &[u8; 32], tag: u8, method: Option<&str>, body: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(2 + method.map(str::len).unwrap_or(0) + body.len());
    plaintext.push(tag);
    if let Some(m) = method {
        plaintext.push(m.len() as u8);
        plaintext.extend_from_slice(m.as_bytes());
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

/// A decoded frame: the tag, an optional method name (present only for request/reply frames
/// carrying a request), and the remaining payload bytes.
struct DecodedFrame {
    tag: u8,
    #[allow(dead_code)]
    method: Option<String>,
    body: Vec<u8>,
}

fn decrypt_frame(session_key: &[u8; 32], frame: &[u8]) -> Result<DecodedFrame> {
    if frame.len() < 24 {
        return Err(NetworkError::Connection("frame too short".into()));
    }
    let (nonce_bytes, ciphertext) = frame.split_at(24);
    let nonce = XNonce::from_slice(nonce_bytes);
    let plaintext = cipher_for(session_key)
        .decrypt(nonce, ciphertext)
        .map_err(|_| NetworkError::Connection("frame decryption failed".into()))?;

    if plaintext.is_empty() {
        return Err(NetworkError::Connection("empty frame".into()));
    }
    let tag = plaintext[0];
    if tag == TAG_NOTIFY {
        return Ok(DecodedFrame { tag, method: None, body: plaintext[1..].to_vec() });
    }
    if plaintext.len() < 2 {
        return Ok(DecodedFrame { tag, method: None, body: Vec::new() });
    }
    let method_len = plaintext[1] as usize;
    if plaintext.len() < 2 + method_len {
        return Err(NetworkError::Connection("truncated method name".into()));
    }
    let method = if method_len > 0 {
        Some(String::from_utf8_lossy(&plaintext[2..2 + method_len]).into_owned())
    } else {
        None
    };
    Ok(DecodedFrame { tag, method, body: plaintext[2 + method_len..].to_vec() })
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    session_key: &[u8; 32],
    tag: u8,
    method: Option<&str>,
    body: Vec<u8>,
) -> Result<()> {
    let framed = encrypt_frame(session_key, tag, method, &body);
    writer.write_all(&framed).await?;
    Ok(())
}

async fn read_raw_frame(reader: &mut OwnedReadHalf) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(NetworkError::Connection("frame exceeds maximum size".into()));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Background task owning the read half: demultiplexes reply frames (delivered to whoever is
/// currently awaiting one in `pending_reply`) from unsolicited `notify.message` pushes
/// (forwarded to `inbound`, tagged with `node_pubkey`). Exits silently when the socket closes;
/// the coordinator notices via the next failed `request`/`send` and re-dials.
async fn read_loop(
    mut reader: OwnedReadHalf,
    session_key: [u8; 32],
    pending_reply: Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>>,
    inbound: mpsc::UnboundedSender<([u8; 32], NotifyMessage)>,
    node_pubkey: [u8; 32],
) {
    loop {
        let raw = match read_raw_frame(&mut reader).await {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let decoded = match decrypt_frame(&session_key, &raw) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if decoded.tag == TAG_NOTIFY {
            if let Ok(msg) = NotifyMessage::decode(&decoded.body) {
                let _ = inbound.send((node_pubkey, msg));
            }
        } else if let Some(sender) = pending_reply.lock().await.take() {
            let _ = sender.send(decoded.body);
        }
    }
}

#[async_trait]
impl SnodeConnection for TcpConnection {
    async fn request(&self, method: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        *self.pending_reply.lock().await = Some(tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) =
                write_frame(&mut writer, &self.session_key, TAG_REQUEST_REPLY, Some(method), body).await
            {
                self.pending_reply.lock().await.take();
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NetworkError::Closed),
            Err(_) => {
                self.pending_reply.lock().await.take();
                Err(NetworkError::Timeout)
            }
        }
    }

    async fn send(&self, method: &str, body: Vec<u8>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut writer, &self.session_key, TAG_REQUEST_REPLY, Some(method), body).await
    }
}
