//! Shard Manager service: derives the shard list from cluster state and
//! republishes availability changes, decoupling the sharding scheme from
//! the cluster state machine's internal representation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};
use tracker_core::{ClusterState, ContentHash as Hash, ErrorKind, MachineId, ShardList};

use crate::cluster_service::{ClusterChange, ClusterStateMachine};

/// Notification fired when the derived shard list changes shape.
#[derive(Debug, Clone)]
pub struct ShardListChanged;

fn derive_shard_list(state: &ClusterState) -> ShardList {
    ShardList::new(
        state
            .records()
            .map(|r| (r.id, r.location.clone(), r.state.is_available()))
            .collect(),
    )
}

/// Republishes `ClusterStateMachine`'s membership events as shard-list
/// changes, and exposes the current list for `shard()` lookups.
pub struct ShardManager {
    current: ArcSwap<ShardList>,
    change_tx: mpsc::UnboundedSender<ShardListChanged>,
    change_rx_template: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ShardListChanged>>>,
}

impl ShardManager {
    #[must_use]
    pub fn new(cluster: &ClusterStateMachine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            current: ArcSwap::from_pointee(derive_shard_list(&cluster.current())),
            change_tx: tx,
            change_rx_template: parking_lot::Mutex::new(Some(rx)),
        }
    }

    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<ShardListChanged>> {
        self.change_rx_template.lock().take()
    }

    #[must_use]
    pub fn current(&self) -> Arc<ShardList> {
        self.current.load_full()
    }

    /// # Errors
    /// Returns [`ErrorKind::NoShards`] when no shard is available.
    pub fn shard(&self, hash: &Hash) -> Result<MachineId, ErrorKind> {
        tracker_core::shard(hash, &self.current())
    }

    /// Recomputes the cached shard list from `cluster`'s current snapshot
    /// without waiting for a change event. Used at startup (before `run()`
    /// has consumed any events yet) and by callers that mutate cluster state
    /// synchronously in tests.
    pub fn refresh(&self, cluster: &ClusterStateMachine) {
        self.current.store(Arc::new(derive_shard_list(&cluster.current())));
        let _ = self.change_tx.send(ShardListChanged);
    }

    /// Drives the manager's shard-list cache from a cluster-change stream,
    /// refreshing from `cluster`'s current snapshot on each event. Intended
    /// to be spawned as a background task alongside the cluster state
    /// machine's own liveness sweep.
    pub async fn run(
        self: Arc<Self>,
        cluster: Arc<ClusterStateMachine>,
        mut changes: broadcast::Receiver<ClusterChange>,
    ) {
        loop {
            match changes.recv().await {
                Ok(ClusterChange::AvailabilityChanged) => self.refresh(&cluster),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => self.refresh(&cluster),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
