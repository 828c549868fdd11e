//! Placement Scheduler
//!
//! Standalone front end for the scheduling core:
//! - `check` replays a topology snapshot and prints the operators the
//!   checkers would issue
//! - `serve` replays a snapshot and keeps the balancers running until
//!   interrupted

use anyhow::Context;
use clap::{Parser, Subcommand};
use placement_core::{system_clock, MemoryIdAllocator};
use placement_metadata::{ClusterInfo, ClusterMeta, TopologySnapshot};
use placement_scheduler::{
    metrics, Coordinator, DefaultClassifier, Handler, LeaderBalancer, PlacementConfig,
    StorageBalancer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "placement-scheduler")]
#[command(about = "Replica placement and balance scheduler")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "placement.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, env = "PLACEMENT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every checker once over a topology snapshot
    Check {
        /// JSON topology snapshot
        #[arg(short, long)]
        topology: PathBuf,
    },
    /// Run the coordinator with the balance schedulers
    Serve {
        /// JSON topology snapshot to start from
        #[arg(short, long)]
        topology: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<PlacementConfig> {
    let config = if path.exists() {
        PlacementConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        PlacementConfig::default()
    };
    let config = config.apply_env();
    config.validate()?;
    Ok(config)
}

fn load_topology(path: &Path) -> anyhow::Result<TopologySnapshot> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Cluster seeded from `topology`, with ids allocated past every id in it
fn build_cluster(
    config: &PlacementConfig,
    topology: Option<&TopologySnapshot>,
) -> anyhow::Result<Arc<ClusterInfo>> {
    let max_id = topology
        .map(|t| {
            t.regions
                .iter()
                .flat_map(|r| std::iter::once(r.id).chain(r.peers.iter().map(|p| p.id)))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    let meta = ClusterMeta {
        id: 1,
        max_peer_count: config.replication.max_replicas,
    };
    let (cluster, mut changes) = ClusterInfo::new(
        meta,
        Arc::new(MemoryIdAllocator::new(max_id + 1)),
        system_clock(),
    )
    .with_hot_thresholds(config.schedule.hot_thresholds())
    .with_change_notifier(config.schedule.region_change_queue_size);

    // Nothing persists region changes in standalone mode; keep the queue drained
    tokio::spawn(async move { while changes.recv().await.is_some() {} });

    let cluster = Arc::new(cluster);
    if let Some(topology) = topology {
        topology.apply(&cluster)?;
        info!(
            stores = cluster.store_count(),
            regions = cluster.region_count(),
            "Topology loaded"
        );
    }
    Ok(cluster)
}

async fn run_check(config: PlacementConfig, topology: &Path) -> anyhow::Result<()> {
    let topology = load_topology(topology)?;
    let cluster = build_cluster(&config, Some(&topology))?;
    let coordinator = Arc::new(Coordinator::new(
        cluster.clone(),
        Arc::new(config),
        Arc::new(DefaultClassifier),
    ));

    for region in cluster.get_regions() {
        coordinator.dispatch(&region);
    }
    let operators = Handler::new(coordinator).operators(None);
    if operators.is_empty() {
        println!("No operators");
    }
    for op in operators {
        println!("{op}");
    }
    Ok(())
}

async fn run_serve(config: PlacementConfig, topology: Option<&Path>) -> anyhow::Result<()> {
    if config.metrics.enabled {
        metrics::install_exporter(config.metrics.port)?;
    }

    let topology = topology.map(load_topology).transpose()?;
    let cluster = build_cluster(&config, topology.as_ref())?;
    let config = Arc::new(config);
    let coordinator = Arc::new(Coordinator::new(
        cluster.clone(),
        config.clone(),
        Arc::new(DefaultClassifier),
    ));

    coordinator.start();
    coordinator.add_scheduler(Arc::new(LeaderBalancer::new(&cluster, config.clone())))?;
    coordinator.add_scheduler(Arc::new(StorageBalancer::new(&cluster, config.clone())))?;
    info!(schedulers = ?coordinator.scheduler_names(), "Placement scheduler started");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    coordinator.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Check { topology } => run_check(config, &topology).await,
        Command::Serve { topology } => run_serve(config, topology.as_deref()).await,
    }
}
