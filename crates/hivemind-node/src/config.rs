//! Layered configuration: nested settings structs deserialized from a single TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming an override config path, checked before `--config`.
pub const CONFIG_ENV_VAR: &str = "SPNS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "./spns.toml";

/// Top-level configuration, deserialized from a TOML file with `db`, `hivemind`, `log`,
/// `keys`, and `notify-<name>` sections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HivemindConfig {
    pub db: DbSettings,
    pub hivemind: CoreSettings,
    #[serde(default)]
    pub log: LogSettings,
    pub keys: KeySettings,
    /// Opaque `notify-<name>.*` blocks, passed through untouched (the core never inspects a
    /// notifier's own settings, only the wire messages it exchanges with the worker).
    #[serde(default)]
    pub notify: HashMap<String, toml::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbSettings {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreSettings {
    /// Seconds between defensive `SwarmTopology` refresh ticks.
    pub subs_interval: u64,
    /// `max_pending_connects`.
    pub max_connects: usize,
    /// `DedupFilter` rotation period in seconds.
    pub filter_lifetime: i64,
    /// Milliseconds to wait for at least one notifier registration before the
    /// "notifiers ready" gate opens unconditionally.
    pub startup_wait: u64,
    /// Bind address for the RequestRouter's authenticated RPC listener.
    pub listen: String,
    /// Hex-encoded X25519 pubkeys allowed to reach client-facing endpoints
    /// (`subscribe`/`unsubscribe`/`notify.*`).
    pub listen_curve: Vec<String>,
    /// Hex-encoded X25519 pubkeys allowed to additionally reach `admin.*` endpoints.
    pub listen_curve_admin: Vec<String>,
    /// Oxen daemon RPC endpoint used by `BlockWatcher`/`SwarmTopology` refresh.
    pub oxend_rpc: String,
    /// `subs_request_limit`, default ≈5 MB.
    #[serde(default = "default_subs_request_limit")]
    pub subs_request_limit: usize,
}

fn default_subs_request_limit() -> usize {
    hivemind_network::DEFAULT_SUBS_REQUEST_LIMIT
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeySettings {
    /// Path to a file containing 32 raw bytes or 64 hex chars: the hivemind identity keypair
    /// used for both outbound snode connections and the inbound RPC listener's handshake.
    pub hivemind: PathBuf,
    /// Path to the onion-request front-end's key material. The front end itself is out of
    /// scope; the key is still loaded so the section round-trips.
    pub onionreq: PathBuf,
}

impl HivemindConfig {
    /// Resolves the config file path: `--config` flag, then `SPNS_CONFIG`, then `./spns.toml`.
    pub fn resolve_path(flag: Option<PathBuf>) -> PathBuf {
        if let Some(path) = flag {
            return path;
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return PathBuf::from(path);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        // `config` deserializes unknown top-level keys into `notify` via the catch-all field;
        // anything else unrecognized is simply dropped by serde rather than rejected.
        let cfg: Self = raw.try_deserialize()?;
        Ok(cfg)
    }

    pub fn load_identity(&self) -> anyhow::Result<hivemind_crypto::NodeKeyPair> {
        let raw = std::fs::read(&self.keys.hivemind)?;
        let secret = hivemind_crypto::load_key_material(&raw)?;
        Ok(hivemind_crypto::NodeKeyPair::from_secret_bytes(secret))
    }

    /// Loads the onion-request key material. Unused beyond this load, since the onion-request
    /// front end is out of scope.
    pub fn load_onionreq_key(&self) -> anyhow::Result<[u8; 32]> {
        let raw = std::fs::read(&self.keys.onionreq)?;
        Ok(hivemind_crypto::load_key_material(&raw)?)
    }

    pub fn listen_curve_pubkeys(&self) -> anyhow::Result<Vec<[u8; 32]>> {
        decode_pubkeys(&self.hivemind.listen_curve)
    }

    pub fn listen_curve_admin_pubkeys(&self) -> anyhow::Result<Vec<[u8; 32]>> {
        decode_pubkeys(&self.hivemind.listen_curve_admin)
    }
}

fn decode_pubkeys(hex_keys: &[String]) -> anyhow::Result<Vec<[u8; 32]>> {
    hex_keys
        .iter()
        .map(|h| {
            let bytes = hex::decode(h)?;
            let arr: [u8; 32] =
                bytes.try_into().map_err(|v: Vec<u8>| anyhow::anyhow!("pubkey must be 32 bytes, got {}", v.len()))?;
            Ok(arr)
        })
        .collect()
}
