//! Tracker server — the I/O-bearing half of the ephemeral distributed
//! content tracker. `tracker-core` supplies the pure data model and merge
//! algebra; this crate wraps it in `ArcSwap`/broadcast-channel services,
//! drives the ring + DHT routing algorithm, and exposes it over a
//! `Cache.ContentTracker` RPC transport.
//!
//! - **Cluster service** ([`cluster_service`]): the cluster-state machine
//!   wrapped in `ArcSwap`, with subscriber notification and a background
//!   liveness sweep.
//! - **Shard manager** ([`shard_manager`]): derives the shard list from
//!   cluster state and republishes availability changes.
//! - **Ring coordinator** ([`ring_coordinator`]): ring membership and leader
//!   promotion.
//! - **Local tracker** ([`local_tracker`]): the mutex-striped in-memory
//!   per-hash store.
//! - **Distributed tracker** ([`distributed_tracker`]): routes updates and
//!   lookups through the ring and DHT, merging partial results.
//! - **Transport** ([`transport`]): the `Cache.ContentTracker` RPC client and
//!   server.
//! - **Batching** ([`batching`]): the Nagle-style outgoing event queue.
//! - **Collaborators** ([`collaborators`]): capability traits for the
//!   external content store and backing persistent cache.
//! - **Config** ([`config`]): per-component configuration structs.
//! - **Service registry** ([`service_registry`]): lifecycle management for
//!   the components above, used by `bin/trackerd.rs`.

pub mod batching;
pub mod cluster_service;
pub mod collaborators;
pub mod config;
pub mod distributed_tracker;
pub mod local_tracker;
pub mod ring_coordinator;
pub mod service_registry;
pub mod shard_manager;
pub mod transport;

pub use cluster_service::{ClusterChange, ClusterStateMachine};
pub use collaborators::{BackingStore, ContentStoreCallback, ContentTracker};
pub use config::TrackerConfig;
pub use distributed_tracker::{DistributedTracker, TrackerOutcome, TransportClient};
pub use local_tracker::LocalContentTracker;
pub use ring_coordinator::RingCoordinator;
pub use service_registry::{ManagedService, ServiceContext, ServiceRegistry};
pub use shard_manager::ShardManager;


/// End-to-end scenario tests wiring several `DistributedTracker`s together
/// over an in-process loopback transport, the way a real deployment wires
/// them over HTTP. One node's `ContentTracker` impl is the RPC handler the
/// others dial into, mirroring what `transport::server` actually dispatches
/// to in production.
#[cfg(test)]
mod scenario_tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use tokio_util::sync::CancellationToken;
    use tracker_core::{ClockSource, ClusterConfig, ContentHash as Hash, ErrorKind, MachineId, MachineLocation, Operation, ShardList, VirtualClock};

    use crate::cluster_service::ClusterStateMachine;
    use crate::collaborators::{BackingStore, ContentTracker, HashSetBackingStore};
    use crate::config::DistributedTrackerConfig;
    use crate::distributed_tracker::{DistributedTracker, TrackerOutcome, TransportClient};
    use crate::local_tracker::LocalContentTracker;
    use crate::ring_coordinator::RingCoordinator;
    use crate::shard_manager::ShardManager;

    /// Routes a call to whichever node registered itself under `target`,
    /// dispatching into that node's `ContentTracker` impl exactly as
    /// `transport::server::handle_request` dispatches an incoming RPC.
    struct LoopbackTransport {
        nodes: DashMap<MachineLocation, Arc<dyn ContentTracker>>,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            Self { nodes: DashMap::new() }
        }

        fn register(&self, location: MachineLocation, node: Arc<dyn ContentTracker>) {
            self.nodes.insert(location, node);
        }

        fn node(&self, target: &MachineLocation) -> Result<Arc<dyn ContentTracker>, ErrorKind> {
            self.nodes.get(target).map(|n| Arc::clone(n.value())).ok_or_else(|| ErrorKind::transient(format!("no such node: {target}")))
        }
    }

    #[async_trait]
    impl TransportClient for LoopbackTransport {
        async fn update_locations(&self, target: &MachineLocation, entries: Vec<tracker_core::ContentEntry>, cancel: &CancellationToken) -> Result<(), ErrorKind> {
            if cancel.is_cancelled() {
                return Err(ErrorKind::Cancelled);
            }
            self.node(target)?.update_locations(entries).await
        }

        async fn get_locations(&self, target: &MachineLocation, hashes: &[Hash], cancel: &CancellationToken) -> Result<Vec<tracker_core::ContentEntry>, ErrorKind> {
            if cancel.is_cancelled() {
                return Err(ErrorKind::Cancelled);
            }
            self.node(target)?.get_locations(hashes).await
        }
    }

    /// Shared cluster-wide services plus a loopback transport, standing in
    /// for a datacenter: every node resolves machine locations, shard
    /// ownership, and ring leadership against the same view.
    struct Cluster {
        cluster: Arc<ClusterStateMachine>,
        shard_manager: Arc<ShardManager>,
        ring_coordinator: Arc<RingCoordinator>,
        transport: Arc<LoopbackTransport>,
        backing_store: Arc<HashSetBackingStore>,
    }

    impl Cluster {
        fn new() -> Self {
            let clock: Arc<dyn ClockSource> = Arc::new(VirtualClock::new(0));
            let cluster = Arc::new(ClusterStateMachine::new(ClusterConfig::default(), clock));
            Self {
                shard_manager: Arc::new(ShardManager::new(&cluster)),
                ring_coordinator: Arc::new(RingCoordinator::new(Arc::clone(&cluster))),
                cluster,
                transport: Arc::new(LoopbackTransport::new()),
                backing_store: Arc::new(HashSetBackingStore::new()),
            }
        }

        /// Registers a machine, refreshes the shared shard list, and builds a
        /// `DistributedTracker` for it wired to the shared services and
        /// loopback transport. The node dials in under its own location.
        fn spawn_node(&self, location: &str) -> (MachineId, Arc<LocalContentTracker>, Arc<DistributedTracker>) {
            let id = self.cluster.register_machine(location.into());
            self.shard_manager.refresh(&self.cluster);

            let local = Arc::new(LocalContentTracker::new(4, id, Arc::new(VirtualClock::new(0))));
            let distributed = Arc::new(DistributedTracker::new(
                Arc::clone(&local),
                Arc::clone(&self.ring_coordinator),
                Arc::clone(&self.shard_manager),
                Arc::clone(&self.transport) as Arc<dyn TransportClient>,
                Arc::clone(&self.backing_store) as Arc<dyn BackingStore>,
                DistributedTrackerConfig::default(),
                id,
            ));
            self.transport.register(location.into(), Arc::clone(&distributed) as Arc<dyn ContentTracker>);
            (id, local, distributed)
        }
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    /// S2 — a worker in one ring adds content; a worker in an unrelated ring
    /// looks it up and finds it through the DHT, not through any ring
    /// relationship between the two (there is none).
    #[tokio::test]
    async fn s2_lookup_crosses_rings_through_the_dht() {
        let dc = Cluster::new();
        let (leader1, _, dist_leader1) = dc.spawn_node("grpc://r1-leader:1/");
        let (w1, _, dist_w1) = dc.spawn_node("grpc://r1-worker:1/");
        let (leader2, _, _dist_leader2) = dc.spawn_node("grpc://r2-leader:1/");
        let (w2, _, dist_w2) = dc.spawn_node("grpc://r2-worker:1/");

        dc.ring_coordinator.add_ring("r1", vec![leader1, w1]);
        dc.ring_coordinator.add_ring("r2", vec![leader2, w2]);
        dist_leader1.set_ring("r1");
        dist_w1.set_ring("r1");
        dist_w2.set_ring("r2");

        let h: Hash = "cross-ring-hash".into();
        let outcome = dist_w1.process_local_change(Operation::Add, h.clone(), 100, &cancel()).await;
        assert!(matches!(outcome, TrackerOutcome::Success(()) | TrackerOutcome::SuccessWithWarnings(..)));

        let outcome = dist_w2.get_locations(&[h], &cancel()).await;
        let entries = match outcome {
            TrackerOutcome::Success(e) | TrackerOutcome::SuccessWithWarnings(e, _) => e,
            other => panic!("expected a lookup result, got {other:?}"),
        };
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains(w1), "W2 should discover W1's content through the DHT");
        assert_eq!(entries[0].size, 100);
    }

    /// S3 — a ten-machine ring's leader adds content locally; the leader
    /// forwards only to the DHT shard owner, never to the rest of the ring,
    /// so most non-leader members' local trackers stay oblivious.
    #[tokio::test]
    async fn s3_leader_never_broadcasts_to_ring_workers() {
        let dc = Cluster::new();
        let mut members = Vec::new();
        for i in 0..10 {
            members.push(dc.spawn_node(&format!("grpc://member-{i}:1/")));
        }
        let ids: Vec<MachineId> = members.iter().map(|(id, _, _)| *id).collect();
        dc.ring_coordinator.add_ring("r1", ids.clone());
        for (_, _, dist) in &members {
            dist.set_ring("r1");
        }

        let leader_id = dc.ring_coordinator.leader_of("r1").expect("ring should have a leader");
        let (_, _, leader_dist) = members.iter().find(|(id, _, _)| *id == leader_id).unwrap();

        let h: Hash = "s3-hash".into();
        let outcome = leader_dist.process_local_change(Operation::Add, h.clone(), 64, &cancel()).await;
        assert!(matches!(outcome, TrackerOutcome::Success(()) | TrackerOutcome::SuccessWithWarnings(..)));

        let ignorant = members
            .iter()
            .filter(|(id, _, _)| *id != leader_id)
            .filter(|(id, local, _)| *id != dc.shard_manager.shard(&h).unwrap_or(leader_id) && local.get_sequence_number(&h, *id) == 0)
            .count();
        assert!(ignorant >= 4, "at least four non-leader, non-owner members should never have heard of the hash, saw {ignorant}");
    }

    /// S4 — content lives only on a ring that then gets removed entirely;
    /// a worker in an unrelated ring can no longer reach it through the DHT
    /// (its sole owner is now dead) and must fall back to the backing store.
    #[tokio::test]
    async fn s4_removed_ring_falls_back_to_backing_store() {
        let dc = Cluster::new();
        let (w1, _, dist_w1) = dc.spawn_node("grpc://r1-worker:1/");
        dc.ring_coordinator.add_ring("r1", vec![w1]);
        dist_w1.set_ring("r1");

        let h: Hash = "s4-hash".into();
        let outcome = dist_w1.process_local_change(Operation::Add, h.clone(), 42, &cancel()).await;
        assert!(matches!(outcome, TrackerOutcome::Success(()) | TrackerOutcome::SuccessWithWarnings(..)));
        // Seed the backing store the way the (out-of-scope) persistent cache
        // would once this content is durably written.
        dc.backing_store.insert(h.clone());

        dc.ring_coordinator.remove_ring("r1");
        dc.shard_manager.refresh(&dc.cluster);

        let (_w2, _, dist_w2) = dc.spawn_node("grpc://r2-worker:1/");

        assert!(dist_w2.might_exist(&h, &cancel()).await, "should fall back to the backing store once the DHT owner is unreachable");
    }

    /// S5 — content added before a new ring exists is still discoverable by
    /// a worker in that ring once it joins: the DHT still routes to a
    /// machine that has it, with no backing-store fallback needed.
    #[tokio::test]
    async fn s5_late_joining_ring_sees_old_content_via_dht() {
        let dc = Cluster::new();
        let (w1, _, dist_w1) = dc.spawn_node("grpc://r1-worker:1/");
        dc.ring_coordinator.add_ring("r1", vec![w1]);
        dist_w1.set_ring("r1");

        // Pick a hash that keeps mapping to w1 even once a second machine
        // joins the ring (adding a machine only moves a bounded fraction of
        // keys, so some hashes are guaranteed to survive the join).
        let w1_location: MachineLocation = "grpc://r1-worker:1/".into();
        let w3_location: MachineLocation = "grpc://r3-worker:1/".into();
        let before = ShardList::new(vec![(w1, w1_location.clone(), true)]);
        let after = ShardList::new(vec![(w1, w1_location.clone(), true), (MachineId(w1.get() + 1000), w3_location.clone(), true)]);
        let h = (0..4000_u32)
            .map(|i| Hash::from(format!("s5-key-{i}")))
            .find(|h| tracker_core::shard(h, &before).ok() == Some(w1) && tracker_core::shard(h, &after).ok() == Some(w1))
            .expect("some key should keep mapping to w1 after a second machine joins");

        let outcome = dist_w1.process_local_change(Operation::Add, h.clone(), 77, &cancel()).await;
        assert!(matches!(outcome, TrackerOutcome::Success(()) | TrackerOutcome::SuccessWithWarnings(..)));

        let (_w3, _, dist_w3) = dc.spawn_node(w3_location.as_str());
        dc.ring_coordinator.add_ring("r3", vec![_w3]);
        dist_w3.set_ring("r3");

        let outcome = dist_w3.get_locations(&[h.clone()], &cancel()).await;
        let entries = match outcome {
            TrackerOutcome::Success(e) | TrackerOutcome::SuccessWithWarnings(e, _) => e,
            other => panic!("expected a lookup result, got {other:?}"),
        };
        assert!(entries[0].contains(w1), "W3 should find the content through the DHT, not the backing store");
        assert!(!dc.backing_store.might_exist(&h).await, "backing store should never have been consulted in this scenario");
    }
}
