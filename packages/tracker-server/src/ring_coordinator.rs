//! Ring Coordinator service (§4.5): tracks which ring each machine belongs
//! to and promotes the next builder when a leader departs.
//!
//! Grounded in the teacher's `ClusterPartitionTable` (`DashMap` keyed
//! registry with lock-free reads) from `cluster/state.rs`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;
use tracker_core::{MachineId, MachineState, Ring};

use crate::cluster_service::{ClusterChange, ClusterStateMachine};

pub type RingId = String;

/// Coordinates ring membership and leader promotion.
pub struct RingCoordinator {
    rings: DashMap<RingId, Ring>,
    machine_to_ring: DashMap<MachineId, RingId>,
    cluster: Arc<ClusterStateMachine>,
}

impl RingCoordinator {
    #[must_use]
    pub fn new(cluster: Arc<ClusterStateMachine>) -> Self {
        Self {
            rings: DashMap::new(),
            machine_to_ring: DashMap::new(),
            cluster,
        }
    }

    /// Adds a ring with the given builders, in registration order. The
    /// leader is `builders[0]`.
    pub fn add_ring(&self, id: impl Into<RingId>, builders: Vec<MachineId>) {
        let id = id.into();
        for &builder in &builders {
            self.machine_to_ring.insert(builder, id.clone());
        }
        self.rings.insert(id.clone(), Ring::new(id, builders));
    }

    /// Removes a ring wholesale, marking every one of its machines
    /// `DeadUnavailable`. Heartbeat delivery publishes cluster-state changes
    /// synchronously (§4.3), so by the time this returns, subscribers have
    /// already observed the availability change.
    pub fn remove_ring(&self, id: &str) {
        if let Some((_, ring)) = self.rings.remove(id) {
            for builder in ring.builders {
                self.machine_to_ring.remove(&builder);
                if let Err(err) = self.cluster.heartbeat(builder, MachineState::DeadUnavailable) {
                    info!(?err, machine_id = %builder, "heartbeat failed while removing ring");
                }
            }
        }
    }

    #[must_use]
    pub fn ring_for_machine(&self, id: MachineId) -> Option<RingId> {
        self.machine_to_ring.get(&id).map(|r| r.clone())
    }

    #[must_use]
    pub fn leader_of(&self, ring_id: &str) -> Option<MachineId> {
        self.rings.get(ring_id).and_then(|r| r.leader())
    }

    /// Removes `id` from its ring's builder list, promoting the next
    /// builder to leader. No election protocol beyond list order (§4.5).
    pub fn promote_next_leader(&self, id: MachineId) {
        let Some(ring_id) = self.ring_for_machine(id) else {
            return;
        };
        if let Some(mut ring) = self.rings.get_mut(&ring_id) {
            ring.remove_builder(id);
            info!(machine_id = %id, ring = %ring_id, new_leader = ?ring.leader(), "promoted next ring leader");
        }
        self.machine_to_ring.remove(&id);
    }

    /// Consumes cluster-change events, auto-promoting a ring's next leader
    /// whenever the current leader transitions to a dead state.
    pub async fn run(self: Arc<Self>, mut changes: broadcast::Receiver<ClusterChange>) {
        loop {
            match changes.recv().await {
                Ok(ClusterChange::MachineStateChanged(id, state)) => {
                    if state.is_dead() && self.ring_for_machine(id).as_deref().and_then(|r| self.leader_of(r)) == Some(id) {
                        self.promote_next_leader(id);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracker_core::{ClusterConfig, VirtualClock};

    fn coordinator() -> (Arc<RingCoordinator>, Arc<ClusterStateMachine>) {
        let clock = Arc::new(VirtualClock::new(0));
        let cluster = Arc::new(ClusterStateMachine::new(ClusterConfig::default(), clock));
        let coord = Arc::new(RingCoordinator::new(Arc::clone(&cluster)));
        (coord, cluster)
    }

    #[test]
    fn leader_is_first_builder() {
        let (coord, _cluster) = coordinator();
        coord.add_ring("r1", vec![MachineId(3), MachineId(1)]);
        assert_eq!(coord.leader_of("r1"), Some(MachineId(3)));
        assert_eq!(coord.ring_for_machine(MachineId(1)), Some("r1".to_string()));
    }

    #[test]
    fn promote_next_leader_removes_departed_builder() {
        let (coord, _cluster) = coordinator();
        coord.add_ring("r1", vec![MachineId(3), MachineId(1)]);
        coord.promote_next_leader(MachineId(3));
        assert_eq!(coord.leader_of("r1"), Some(MachineId(1)));
        assert_eq!(coord.ring_for_machine(MachineId(3)), None);
    }

    #[test]
    fn remove_ring_marks_builders_dead_unavailable() {
        let (coord, cluster) = coordinator();
        let id = cluster.register_machine("grpc://a:1/".into());
        coord.add_ring("r1", vec![id]);

        coord.remove_ring("r1");

        assert_eq!(cluster.current().record(id).unwrap().state, MachineState::DeadUnavailable);
        assert!(coord.ring_for_machine(id).is_none());
    }

    #[tokio::test]
    async fn leader_death_auto_promotes_next_builder() {
        let (coord, cluster) = coordinator();
        let changes = cluster.subscribe();
        let leader = cluster.register_machine("grpc://leader:1/".into());
        let worker = cluster.register_machine("grpc://worker:1/".into());
        coord.add_ring("r1", vec![leader, worker]);

        let runner = tokio::spawn(Arc::clone(&coord).run(changes));
        cluster.heartbeat(leader, MachineState::DeadExpired).unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if coord.leader_of("r1") == Some(worker) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("leader should be promoted");

        runner.abort();
    }
}
