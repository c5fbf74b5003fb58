//! Tracker daemon entrypoint: parses configuration from CLI/env (`clap`),
//! initializes `tracing`, wires the cluster state machine, shard manager,
//! ring coordinator, and distributed tracker behind a `Cache.ContentTracker`
//! transport server, and runs until an interrupt signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use tracker_core::{ClockSource, ClusterConfig, SystemClock};
use tracker_server::batching::BatchingQueue;
use tracker_server::cluster_service::ClusterStateMachine;
use tracker_server::collaborators::{ContentTracker, NullBackingStore};
use tracker_server::config::{BatchingConfig, DistributedTrackerConfig, NetworkConfig, TrackerConfig};
use tracker_server::distributed_tracker::DistributedTracker;
use tracker_server::local_tracker::LocalContentTracker;
use tracker_server::ring_coordinator::RingCoordinator;
use tracker_server::service_registry::{ManagedService, ServiceContext, ServiceRegistry};
use tracker_server::shard_manager::ShardManager;
use tracker_server::transport::{ReqwestTransportClient, TransportServer};

/// Runs one node of the ephemeral distributed content tracker.
#[derive(Parser, Debug)]
#[command(name = "trackerd")]
struct Args {
    /// This node's own canonical location, e.g. `grpc://10.0.0.1:7420/`.
    #[arg(long, env = "TRACKERD_SELF_LOCATION")]
    self_location: String,

    #[arg(long, env = "TRACKERD_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "TRACKERD_PORT", default_value_t = 7420)]
    port: u16,

    #[arg(long, env = "TRACKERD_HEARTBEAT_INTERVAL_MS", default_value_t = 10_000)]
    heartbeat_interval_ms: u64,

    #[arg(long, env = "TRACKERD_BATCH_SIZE", default_value_t = 256)]
    event_batch_size: usize,

    #[arg(long, env = "TRACKERD_NAGLE_INTERVAL_MS", default_value_t = 100)]
    event_nagle_interval_ms: u64,

    #[arg(long, env = "TRACKERD_K", default_value_t = 1)]
    k: usize,

    #[arg(long, env = "TRACKERD_LOG", default_value = "info")]
    log: String,
}

impl Args {
    fn into_config(self) -> (TrackerConfig, String, String) {
        let config = TrackerConfig {
            node_id: self.self_location.clone(),
            cluster: ClusterConfig::default(),
            network: NetworkConfig { host: self.host, port: self.port, ..NetworkConfig::default() },
            batching: BatchingConfig {
                event_batch_size: self.event_batch_size,
                event_nagle_interval: Duration::from_millis(self.event_nagle_interval_ms),
            },
            distributed: DistributedTrackerConfig { k: self.k, ..DistributedTrackerConfig::default() },
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            ..TrackerConfig::default()
        };
        (config, self.self_location, self.log)
    }
}

/// Drives the cluster state machine's background liveness sweep.
struct ClusterSweepService {
    cluster: Arc<ClusterStateMachine>,
    heartbeat_interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ManagedService for ClusterSweepService {
    fn name(&self) -> &'static str {
        "cluster-sweep"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        *self.handle.lock() = Some(self.cluster.spawn_liveness_sweep(self.heartbeat_interval));
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Drives the shard manager's cluster-change-driven refresh loop.
struct ShardManagerService {
    shard_manager: Arc<ShardManager>,
    cluster: Arc<ClusterStateMachine>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ManagedService for ShardManagerService {
    fn name(&self) -> &'static str {
        "shard-manager"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        let shard_manager = Arc::clone(&self.shard_manager);
        let cluster = Arc::clone(&self.cluster);
        let changes = self.cluster.subscribe();
        *self.handle.lock() = Some(tokio::spawn(shard_manager.run(cluster, changes)));
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Drives the ring coordinator's leader-auto-promotion loop.
struct RingCoordinatorService {
    ring_coordinator: Arc<RingCoordinator>,
    cluster: Arc<ClusterStateMachine>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ManagedService for RingCoordinatorService {
    fn name(&self) -> &'static str {
        "ring-coordinator"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        let ring_coordinator = Arc::clone(&self.ring_coordinator);
        let changes = self.cluster.subscribe();
        *self.handle.lock() = Some(tokio::spawn(ring_coordinator.run(changes)));
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Binds and serves the `Cache.ContentTracker` transport until shut down.
struct TransportService {
    server: Mutex<Option<TransportServer>>,
    shutdown_tx: Mutex<Option<watch::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
}

#[async_trait]
impl ManagedService for TransportService {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        let mut server = self.server.lock().take().expect("transport service initialized twice");
        let port = server.start().await?;
        info!(port, "transport bound");

        let (tx, mut rx) = watch::channel(());
        *self.shutdown_tx.lock() = Some(tx);

        let shutdown = async move {
            let _ = rx.changed().await;
        };
        *self.handle.lock() = Some(tokio::spawn(server.serve(shutdown)));
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, self_location, log) = args.into_config();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log)))
        .init();

    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
    let cluster = Arc::new(ClusterStateMachine::new(config.cluster.clone(), Arc::clone(&clock)));
    let self_machine = cluster.register_machine(self_location.clone().into());

    let shard_manager = Arc::new(ShardManager::new(&cluster));
    shard_manager.refresh(&cluster);
    let ring_coordinator = Arc::new(RingCoordinator::new(Arc::clone(&cluster)));

    let local = Arc::new(LocalContentTracker::new(config.local_tracker_stripes, self_machine, Arc::clone(&clock)));
    let transport_client = Arc::new(ReqwestTransportClient::new(config.network.remote_construction_timeout));
    let distributed = Arc::new(DistributedTracker::new(
        local,
        Arc::clone(&ring_coordinator),
        Arc::clone(&shard_manager),
        transport_client,
        Arc::new(NullBackingStore),
        config.distributed,
        self_machine,
    ));

    // Forwarded local mutations batch through a Nagle queue before crossing
    // the network (§5); the flusher hands each batch to the distributed
    // tracker's own update path rather than duplicating routing logic here.
    struct ForwardToDistributed {
        distributed: Arc<DistributedTracker>,
    }
    #[async_trait]
    impl tracker_server::batching::Flusher<tracker_core::ContentEntry> for ForwardToDistributed {
        async fn flush(&self, batch: Vec<tracker_core::ContentEntry>) {
            if let Err(err) = self.distributed.update_locations(batch).await {
                tracing::warn!(%err, "batched forward failed");
            }
        }
    }
    let _batching: BatchingQueue<tracker_core::ContentEntry> = BatchingQueue::new(
        config.batching.event_batch_size,
        config.batching.event_nagle_interval,
        Arc::new(ForwardToDistributed { distributed: Arc::clone(&distributed) }),
    );

    let transport_server = TransportServer::new(config.network.host.clone(), config.network.port, distributed as Arc<dyn ContentTracker>);

    let registry = ServiceRegistry::new();
    registry.register(ClusterSweepService { cluster: Arc::clone(&cluster), heartbeat_interval: config.heartbeat_interval, handle: Mutex::new(None) });
    registry.register(ShardManagerService { shard_manager, cluster: Arc::clone(&cluster), handle: Mutex::new(None) });
    registry.register(RingCoordinatorService { ring_coordinator, cluster: Arc::clone(&cluster), handle: Mutex::new(None) });
    registry.register(TransportService { server: Mutex::new(Some(transport_server)), shutdown_tx: Mutex::new(None), handle: Mutex::new(None) });

    let ctx = ServiceContext { node_id: config.node_id.clone() };
    registry.init_all(&ctx).await?;
    info!(machine_id = %self_machine, "trackerd started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    registry.shutdown_all().await?;
    Ok(())
}
