//! `hivemind-cli`: a thin admin client for the SPNS hivemind core, reaching `admin.get_stats`
//! and `admin.register_service` over the same curve-authenticated RPC transport the
//! `hivemind` binary's listener speaks. There is no HTTP endpoint here to speak to — every
//! call is framed, encrypted, and sent over a single TCP connection.

use std::path::PathBuf;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use clap::{Parser, Subcommand};
use hivemind_crypto::NodeKeyPair;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TAG_CURVE: u8 = 0;
const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;
const CLIENT_SESSION_CONTEXT: &[u8] = b"OxenSSHivemindListener";

#[derive(Parser)]
#[command(name = "hivemind-cli", about = "Admin client for the SPNS hivemind core")]
struct Cli {
    /// `host:port` of the hivemind's authenticated RPC listener.
    #[arg(long, default_value = "127.0.0.1:22020")]
    endpoint: String,

    /// Path to this client's admin identity key (32 raw bytes or 64 hex chars), which must be
    /// listed in the server's `listen_curve_admin`.
    #[arg(long, value_name = "PATH")]
    key: PathBuf,

    /// The hivemind's own X25519 public key, hex-encoded (from its startup log line).
    #[arg(long, value_name = "HEX")]
    server_pubkey: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch aggregate runtime stats.
    GetStats,

    /// Query whether a notifier service is currently connected (`admin.register_service`).
    RegisterService {
        /// Service name, e.g. "apns" or "fcm".
        service: String,
    },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false).with_file(false))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let raw = std::fs::read(&cli.key)?;
    let secret_bytes = hivemind_crypto::load_key_material(&raw)?;
    let identity = NodeKeyPair::from_secret_bytes(secret_bytes);

    let server_pubkey_bytes: [u8; 32] = hex::decode(&cli.server_pubkey)?
        .try_into()
        .map_err(|_| anyhow::anyhow!("--server-pubkey must be 32 bytes hex-encoded"))?;

    let mut client = RpcClient::connect(&cli.endpoint, &identity, server_pubkey_bytes).await?;

    let reply = match cli.command {
        Commands::GetStats => client.call("admin.get_stats", serde_json::json!({})).await?,
        Commands::RegisterService { service } => {
            client.call("admin.register_service", serde_json::json!({ "service": service })).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

/// One curve-authenticated RPC connection to the hivemind listener.
struct RpcClient {
    stream: TcpStream,
    session_key: [u8; 32],
}

impl RpcClient {
    async fn connect(endpoint: &str, identity: &NodeKeyPair, server_pubkey: [u8; 32]) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true).ok();

        stream.write_all(&[TAG_CURVE]).await?;
        stream.write_all(&identity.public_bytes()).await?;

        let server_pubkey = x25519_dalek::PublicKey::from(server_pubkey);
        let shared = identity.secret().diffie_hellman(&server_pubkey);
        let session_key = hivemind_crypto::blake2b_256_keyed(CLIENT_SESSION_CONTEXT, shared.as_bytes());

        Ok(Self { stream, session_key })
    }

    async fn call(&mut self, method: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body_bytes = serde_json::to_vec(&body)?;
        let framed = encrypt_frame(&self.session_key, Some(method), &body_bytes);
        self.stream.write_all(&framed).await?;

        let raw = read_raw_frame(&mut self.stream).await?;
        let (_, reply_body) = decrypt_frame(&self.session_key, &raw)?;
        Ok(serde_json::from_slice(&reply_body)?)
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

async fn read_raw_frame(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame exceeds maximum size");
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
