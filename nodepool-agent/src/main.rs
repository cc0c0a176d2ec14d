//! nodepool-agent: reports the ZFS pools of a node as a `PoolInventory`.
//!
//! This daemon runs on each storage node and:
//! - Probes the local pools with `zpool list`
//! - Creates the node's `PoolInventory` object if it is missing
//! - Keeps the object's pools and owner reference current, on watch events
//!   and on a fixed resync interval

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, CustomResourceExt};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nodepool_agent::backend::kubernetes::KubeBackend;
use nodepool_agent::backend::memory::MemoryBackend;
use nodepool_agent::{Config, Controller, InventoryBackend, PoolInventory, ZpoolProber};

/// nodepool Agent
#[derive(Parser, Debug)]
#[command(name = "nodepool-agent", version, about)]
struct Args {
    /// Namespace of the PoolInventory object
    #[arg(long, default_value = "openebs")]
    namespace: String,

    /// Node name (defaults to hostname)
    #[arg(long)]
    node_name: Option<String>,

    /// Node UID (looked up from the Node object if not provided)
    #[arg(long)]
    node_uid: Option<String>,

    /// Number of reconcile workers
    #[arg(long, default_value = "1")]
    workers: usize,

    /// Resync interval in seconds
    #[arg(long, default_value = "60")]
    resync_interval: u64,

    /// Seconds to wait for the initial cache sync
    #[arg(long, default_value = "30")]
    cache_sync_timeout: u64,

    /// Timeout of a single backend call in seconds
    #[arg(long, default_value = "10")]
    call_timeout: u64,

    /// Only report these pools (repeatable). All pools if not given.
    #[arg(long = "pool")]
    pools: Vec<String>,

    /// Use an in-memory store instead of the Kubernetes API
    #[arg(long)]
    dev: bool,

    /// Print the PoolInventory CRD as JSON and exit
    #[arg(long)]
    print_crd: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nodepool_agent=info,kube=warn,hyper=warn,tower=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.print_crd {
        let crd = serde_json::to_string_pretty(&PoolInventory::crd())
            .context("Failed to serialize CRD")?;
        println!("{}", crd);
        return Ok(());
    }

    // Get node name from args or hostname
    let node_name = match args.node_name.clone() {
        Some(name) => name,
        None => hostname::get()
            .context("Failed to read hostname")?
            .to_string_lossy()
            .into_owned(),
    };

    info!("Starting nodepool-agent: {}", node_name);

    let (backend, node_uid): (Arc<dyn InventoryBackend>, String) = if args.dev {
        info!("Running against the in-memory store");
        let uid = args
            .node_uid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        (Arc::new(MemoryBackend::new()), uid)
    } else {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        let uid = match args.node_uid.clone() {
            Some(uid) => uid,
            None => lookup_node_uid(client.clone(), &node_name).await?,
        };
        (Arc::new(KubeBackend::new(client)), uid)
    };
    info!("Node UID: {}", node_uid);

    let mut config = Config::new(&args.namespace, &node_name, node_uid);
    config.workers = args.workers;
    config.resync_interval = Duration::from_secs(args.resync_interval);
    config.cache_sync_timeout = Duration::from_secs(args.cache_sync_timeout);
    config.call_timeout = Duration::from_secs(args.call_timeout);

    let prober = Arc::new(ZpoolProber::new(args.pools));
    let controller = Controller::new(config, backend, prober).context("Invalid configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => info!("Received {}, shutting down", name),
            Err(e) => tracing::error!("Signal handling failed, shutting down: {:#}", e),
        }
        shutdown_tx.send_replace(true);
    });

    controller
        .run(shutdown_rx)
        .await
        .context("Controller failed")?;

    info!("nodepool-agent stopped");
    Ok(())
}

async fn lookup_node_uid(client: Client, node_name: &str) -> Result<String> {
    let nodes: Api<Node> = Api::all(client);
    let node = nodes
        .get(node_name)
        .await
        .with_context(|| format!("Failed to get node {}", node_name))?;
    node.metadata
        .uid
        .ok_or_else(|| anyhow!("Node {} has no UID", node_name))
}

async fn wait_for_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            Ok("SIGINT")
        }
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}
