//! The hivemind-side handle to one connected notifier worker process.
//!
//! Notifier workers dial in (the reverse direction of Hive's connections to service nodes:
//! there, we are the client; here, the worker is) and identify themselves with a service name via
//! `admin.register_service`. Framing mirrors `hivemind_network::transport`: 4-byte BE length
//! prefix, 24-byte nonce, XChaCha20-Poly1305 ciphertext, but the session key is a static value
//! derived once from the hivemind identity and the service name (`derive_notifier_key`) rather
//! than negotiated by Diffie-Hellman, since both ends can compute it without a handshake
//! round-trip.
//!
//! The connection is full-duplex, same as the snode transport: hivemind issues `notifier.validate`
//! / `notifier.push` requests at any time, while the worker independently sends `admin.*` requests
//! of its own (initial registration, periodic stat reports, re-registration). A background reader
//! task demultiplexes by the presence of a method name: a frame naming a method is always a new
//! request from the peer, dispatched to `requests`; a frame with no method name is a reply to
//! whichever of our own requests is currently outstanding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{NotifyError, Result};

const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// One live connection to a registered notifier worker.
#[async_trait]
pub trait NotifierConnection: Send + Sync {
    /// `notifier.validate`: sends the raw bencoded two-part message and awaits a reply frame,
    /// or `NotifyError::ValidateTimeout` if none arrives within `timeout`.
    async fn validate(&self, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>>;

    /// `notifier.push`: fire-and-forget.
    async fn push(&self, body: Vec<u8>) -> Result<()>;
}

/// A request the worker sent us (`admin.register_service`, `admin.service_stats`). `reply` must
/// be fed the raw response body; dropping it without a reply simply starves the worker's own
/// timeout, which is treated as a transient hiccup and retried on the worker's side.
pub struct WorkerRequest {
    pub method: String,
    pub body: Vec<u8>,
    pub reply: oneshot::Sender<Vec<u8>>,
}

pub struct FramedNotifierConnection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    session_key: [u8; 32],
    pending_reply: Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>>,
}

impl FramedNotifierConnection {
    /// Splits `stream` and spawns the background reader task. `requests` receives every
    /// worker-initiated frame (one naming a method); the caller is expected to answer each via
    /// its `reply` channel, which the reader task relays back over the wire as a method-less
    /// reply frame.
    pub fn new(stream: TcpStream, session_key: [u8; 32], requests: mpsc::UnboundedSender<WorkerRequest>) -> Self {
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let pending_reply: Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>> = Arc::new(Mutex::new(None));

        tokio::spawn(read_loop(read_half, writer.clone(), session_key, pending_reply.clone(), requests));

        Self { writer, session_key, pending_reply }
    }
}

fn cipher_for(session_key: &[u8; 32]) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(session_key.into())
}

fn encrypt_frame(session_key: &[u8; 32], method: Option<&str>, body: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(1 + method.map(str::len).unwrap_or(0) + body.len());
    if let Some(m) = method {
        plaintext.push(m.len() as u8);
        plaintext.extend_from_slice(m.as_bytes());
    } else {
        plaintext.push(0);
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

struct DecodedFrame {
    method: Option<String>,
    body: Vec<u8>,
}

fn decrypt_frame(session_key: &[u8; 32], frame: &[u8]) -> Result<DecodedFrame> {
    if frame.len() < 24 {
        return Err(io_err("frame too short"));
    }
    let (nonce_bytes, ciphertext) = frame.split_at(24);
    let nonce = XNonce::from_slice(nonce_bytes);
    let plaintext = cipher_for(session_key).decrypt(nonce, ciphertext).map_err(|_| io_err("frame decryption failed"))?;

    if plaintext.is_empty() {
        return Err(io_err("empty frame"));
    }
    let method_len = plaintext[0] as usize;
    if plaintext.len() < 1 + method_len {
        return Err(io_err("truncated method name"));
    }
    let method = if method_len > 0 { Some(String::from_utf8_lossy(&plaintext[1..1 + method_len]).into_owned()) } else { None };
    Ok(DecodedFrame { method, body: plaintext[1 + method_len..].to_vec() })
}

fn io_err(msg: &'static str) -> NotifyError {
    NotifyError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

async fn write_frame(writer: &mut OwnedWriteHalf, session_key: &[u8; 32], method: Option<&str>, body: Vec<u8>) -> Result<()> {
    let framed = encrypt_frame(session_key, method, &body);
    writer.write_all(&framed).await?;
    Ok(())
}

async fn read_raw_frame(reader: &mut OwnedReadHalf) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io_err("frame exceeds maximum size"));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Background task owning the read half. A decoded frame naming a method is a new request from
/// the worker, forwarded to `requests` with a one-shot reply channel that the consumer answers;
/// otherwise it's the reply to whichever of our own `validate` calls is outstanding. Exits
/// silently on socket close; the next `validate`/`push` surfaces the failure to the caller.
async fn read_loop(
    mut reader: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    session_key: [u8; 32],
    pending_reply: Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>>,
    requests: mpsc::UnboundedSender<WorkerRequest>,
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
        match decoded.method {
            Some(method) => {
                let (tx, rx) = oneshot::channel();
                if requests.send(WorkerRequest { method, body: decoded.body, reply: tx }).is_err() {
                    continue;
                }
                let writer = writer.clone();
                tokio::spawn(async move {
                    if let Ok(reply_body) = rx.await {
                        let mut writer = writer.lock().await;
                        let _ = write_frame(&mut writer, &session_key, None, reply_body).await;
                    }
                });
            }
            None => {
                if let Some(sender) = pending_reply.lock().await.take() {
                    let _ = sender.send(decoded.body);
                }
            }
        }
    }
}

#[async_trait]
impl NotifierConnection for FramedNotifierConnection {
    async fn validate(&self, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        *self.pending_reply.lock().await = Some(tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut writer, &self.session_key, Some("notifier.validate"), body).await {
                self.pending_reply.lock().await.take();
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NotifyError::ValidateTimeout),
            Err(_) => {
                self.pending_reply.lock().await.take();
                Err(NotifyError::ValidateTimeout)
            }
        }
    }

    async fn push(&self, body: Vec<u8>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut writer, &self.session_key, Some("notifier.push"), body).await
    }
}

/// Shorthand used by [`crate::bus::NotifierBus`] for a boxed, shareable connection.
pub type SharedConnection = Arc<dyn NotifierConnection>;
