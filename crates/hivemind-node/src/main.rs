//! `hivemind`: the SPNS core binary. Wires configuration, persistence, topology, the snode
//! connection pool, the notifier registry, and the authenticated RPC listener together, then
//! runs until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hivemind_network::{DedupFilter, Hive, SwarmTopology, TcpSnodeConnector};
use hivemind_notify::NotifierBus;
use hivemind_store::{PostgresPersistence, SubscriptionStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hivemind_node::{BlockWatcher, Coordinator, HivemindConfig, HttpOxendClient, Listener, RequestRouter};

#[derive(Parser, Debug)]
#[command(name = "hivemind", about = "Session Push Notification Server core")]
struct Cli {
    /// Path to the TOML configuration file. Falls back to `SPNS_CONFIG`, then `./spns.toml`.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// How often expired subscriptions are swept. Not itself configurable;
/// running it far more often than the 14-day expiry window it enforces buys nothing.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = HivemindConfig::resolve_path(cli.config);
    let config = HivemindConfig::load(&config_path)?;

    init_logging(&config.log.level);
    tracing::info!(config = %config_path.display(), "loaded configuration");

    let identity = Arc::new(config.load_identity()?);
    tracing::info!(pubkey = %hex::encode(identity.public_bytes()), "hivemind identity loaded");

    let persistence = Arc::new(PostgresPersistence::connect(&config.db.url).await?);
    persistence.migrate().await?;

    let now = hivemind_core::now_unix();
    let mut store = SubscriptionStore::new(persistence);
    store.load_all(now, hivemind_core::SIGNATURE_EXPIRY_SECS).await?;

    let hive = Hive::new(config.hivemind.max_connects as u32);
    let topology = SwarmTopology::new();
    let dedup = DedupFilter::new(config.hivemind.filter_lifetime, now);
    let bus = NotifierBus::new();

    let connector = Arc::new(TcpSnodeConnector::new(identity.secret().clone()));
    let oxend = Arc::new(HttpOxendClient::new(config.hivemind.oxend_rpc.clone()));

    let coordinator = Coordinator::new(
        store,
        hive,
        topology,
        dedup,
        bus,
        connector,
        oxend.clone(),
        config.hivemind.subs_request_limit,
    );

    let router = RequestRouter::new(coordinator.clone(), config.hivemind.startup_wait);

    BlockWatcher::new(coordinator.clone(), oxend, Duration::from_secs(config.hivemind.subs_interval)).spawn();
    spawn_expiry_sweep(coordinator.clone());

    let listener = Listener::new(
        router,
        identity,
        config.listen_curve_pubkeys()?,
        config.listen_curve_admin_pubkeys()?,
    );

    let listen_addr = config.hivemind.listen.clone();
    let serve_handle = tokio::spawn(async move {
        if let Err(err) = listener.serve(&listen_addr).await {
            tracing::error!(error = %err, "RPC listener exited");
        }
    });

    wait_for_shutdown().await;
    tracing::info!("shutdown signal received, draining");
    serve_handle.abort();

    Ok(())
}

fn spawn_expiry_sweep(coordinator: Arc<Coordinator>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            coordinator.expire_subscriptions(hivemind_core::now_unix(), hivemind_core::SIGNATURE_EXPIRY_SECS).await;
        }
    });
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false).with_file(false))
        .init();
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sighup.recv() => {},
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
