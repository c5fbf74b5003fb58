//! Distributed Tracker (§4.6): routes updates through the ring leader and
//! DHT shard owner, and merges partial lookup responses.
//!
//! Retry/backoff for transient hop failures generalizes the teacher's
//! `TimeoutService`/`TimeoutLayer` (`service/middleware/timeout.rs`) pattern
//! of wrapping a call in `tokio::time::timeout` into a small helper that also
//! retries `Transient` failures with exponential backoff.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracker_core::{ContentEntry, ContentHash as Hash, ErrorKind, MachineId, MachineLocation, Operation};

use crate::collaborators::{BackingStore, ContentStoreCallback, ContentTracker};
use crate::config::DistributedTrackerConfig;
use crate::local_tracker::LocalContentTracker;
use crate::ring_coordinator::RingCoordinator;
use crate::shard_manager::ShardManager;

/// Outgoing RPC surface the distributed tracker routes through. An HTTP +
/// MsgPack implementation lives in `crate::transport::client`.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn update_locations(
        &self,
        target: &MachineLocation,
        entries: Vec<ContentEntry>,
        cancel: &CancellationToken,
    ) -> Result<(), ErrorKind>;

    async fn get_locations(
        &self,
        target: &MachineLocation,
        hashes: &[Hash],
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentEntry>, ErrorKind>;
}

/// Aggregate outcome of a distributed operation (§7): success may carry
/// partial-data diagnostics from hops that failed without aborting the
/// overall operation.
#[derive(Debug)]
pub enum TrackerOutcome<T> {
    Success(T),
    SuccessWithWarnings(T, Vec<tracker_core::Diagnostic>),
    Failure(ErrorKind, Vec<tracker_core::Diagnostic>),
    Cancelled,
}

/// Retries `op` while it returns a `Transient` error, backing off
/// exponentially up to `config.max_remote_wait`, honoring `cancel`.
async fn retry_transient<T, F, Fut>(
    config: &DistributedTrackerConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ErrorKind>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ErrorKind>>,
{
    let mut backoff = config.initial_backoff;
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(ErrorKind::Transient { diagnostic, cause }) => {
                attempt += 1;
                if attempt >= config.max_retry_attempts {
                    return Err(ErrorKind::Transient { diagnostic, cause });
                }
                warn!(attempt, %diagnostic, "transient hop failure, retrying");
                tokio::select! {
                    () = cancel.cancelled() => return Err(ErrorKind::Cancelled),
                    () = tokio::time::sleep(backoff) => {},
                }
                backoff = (backoff * 2).min(config.max_remote_wait);
            }
            Err(other) => return Err(other),
        }
    }
}

/// Sits above the local tracker and implements §4.6's routing algorithm.
pub struct DistributedTracker {
    local: Arc<LocalContentTracker>,
    ring_coordinator: Arc<RingCoordinator>,
    shard_manager: Arc<ShardManager>,
    transport: Arc<dyn TransportClient>,
    backing_store: Arc<dyn BackingStore>,
    config: DistributedTrackerConfig,
    self_machine: MachineId,
    ring_id: RingIdSlot,
}

/// The ring this machine currently belongs to, set once at startup by
/// whoever wires the tracker together (mirrors the teacher's
/// construction-over-inheritance composition style).
type RingIdSlot = parking_lot::Mutex<Option<String>>;

impl DistributedTracker {
    #[must_use]
    pub fn new(
        local: Arc<LocalContentTracker>,
        ring_coordinator: Arc<RingCoordinator>,
        shard_manager: Arc<ShardManager>,
        transport: Arc<dyn TransportClient>,
        backing_store: Arc<dyn BackingStore>,
        config: DistributedTrackerConfig,
        self_machine: MachineId,
    ) -> Self {
        Self {
            local,
            ring_coordinator,
            shard_manager,
            transport,
            backing_store,
            config,
            self_machine,
            ring_id: parking_lot::Mutex::new(None),
        }
    }

    pub fn set_ring(&self, ring_id: impl Into<String>) {
        *self.ring_id.lock() = Some(ring_id.into());
    }

    fn is_ring_leader(&self) -> bool {
        let Some(ring_id) = self.ring_id.lock().clone() else {
            return true;
        };
        self.ring_coordinator.leader_of(&ring_id) == Some(self.self_machine)
    }

    fn ring_leader_location(&self) -> Option<MachineLocation> {
        let ring_id = self.ring_id.lock().clone()?;
        let leader_id = self.ring_coordinator.leader_of(&ring_id)?;
        self.local_machine_location(leader_id)
    }

    // Machine locations are resolved through the shard list snapshot, which
    // already carries (id, location, available) triples from cluster state.
    fn local_machine_location(&self, id: MachineId) -> Option<MachineLocation> {
        self.shard_manager.current().location_of(id)
    }

    /// Forwards `entry` to its DHT shard owner, a no-op if `self` already
    /// owns that shard. Shared by the leader-local-change path in
    /// `process_local_change` and the relay-on-receive path in the
    /// `ContentTracker::update_locations` RPC handler.
    async fn forward_to_dht_owner(&self, entry: ContentEntry, cancel: &CancellationToken) -> Result<(), ErrorKind> {
        let owner = self.shard_manager.shard(&entry.hash)?;
        if owner == self.self_machine {
            return Ok(());
        }
        let Some(owner_location) = self.local_machine_location(owner) else {
            return Ok(());
        };
        retry_transient(&self.config, cancel, || self.transport.update_locations(&owner_location, vec![entry.clone()], cancel)).await
    }

    /// Update path (§4.6): mint locally, forward to the ring leader if this
    /// machine isn't one, which in turn forwards to the DHT shard owner.
    pub async fn process_local_change(
        &self,
        op: Operation,
        hash: Hash,
        size: i64,
        cancel: &CancellationToken,
    ) -> TrackerOutcome<()> {
        let entry = self.local.process_local_change(op, hash.clone(), size);
        let mut diagnostics = Vec::new();

        if !self.is_ring_leader() {
            if let Some(leader_location) = self.ring_leader_location() {
                let result = retry_transient(&self.config, cancel, || {
                    self.transport.update_locations(&leader_location, vec![entry.clone()], cancel)
                })
                .await;
                match result {
                    Ok(()) => {}
                    Err(ErrorKind::Cancelled) => return TrackerOutcome::Cancelled,
                    Err(err) if err.is_retryable() => {
                        diagnostics.push(tracker_core::Diagnostic::new("ring-leader", err.to_string()));
                    }
                    Err(err) => return TrackerOutcome::Failure(err, diagnostics),
                }
            }
            return if diagnostics.is_empty() {
                TrackerOutcome::Success(())
            } else {
                TrackerOutcome::SuccessWithWarnings((), diagnostics)
            };
        }

        // We are the leader: merge already happened into `self.local` above;
        // forward to the DHT shard owner.
        match self.forward_to_dht_owner(entry.clone(), cancel).await {
            Ok(()) => {}
            Err(ErrorKind::Cancelled) => return TrackerOutcome::Cancelled,
            Err(ErrorKind::NoShards) => diagnostics.push(tracker_core::Diagnostic::new("shard", ErrorKind::NoShards.to_string())),
            Err(err) => diagnostics.push(tracker_core::Diagnostic::new("dht-owner", err.to_string())),
        }

        if diagnostics.is_empty() {
            TrackerOutcome::Success(())
        } else {
            TrackerOutcome::SuccessWithWarnings((), diagnostics)
        }
    }

    /// Lookup path (§4.6): local, then ring leader for hashes with fewer
    /// than `k` reachable locations, then the DHT shard owner.
    pub async fn get_locations(&self, hashes: &[Hash], cancel: &CancellationToken) -> TrackerOutcome<Vec<ContentEntry>> {
        if cancel.is_cancelled() {
            return TrackerOutcome::Cancelled;
        }

        let mut merged = self.local.get_locations(hashes);
        let mut diagnostics = Vec::new();

        let insufficient: Vec<Hash> = merged
            .iter()
            .filter(|e| e.locations().count() < self.config.k)
            .map(|e| e.hash.clone())
            .collect();

        if !insufficient.is_empty() && !self.is_ring_leader() {
            if let Some(leader_location) = self.ring_leader_location() {
                match retry_transient(&self.config, cancel, || {
                    self.transport.get_locations(&leader_location, &insufficient, cancel)
                })
                .await
                {
                    Ok(remote) => merge_into(&mut merged, &remote),
                    Err(ErrorKind::Cancelled) => return TrackerOutcome::Cancelled,
                    Err(err) => diagnostics.push(tracker_core::Diagnostic::new("ring-leader", err.to_string())),
                }
            }
        }

        let still_insufficient: Vec<Hash> = merged
            .iter()
            .filter(|e| e.locations().count() < self.config.k)
            .map(|e| e.hash.clone())
            .collect();

        for hash in still_insufficient {
            let Ok(owner) = self.shard_manager.shard(&hash) else {
                diagnostics.push(tracker_core::Diagnostic::new("shard", "no available shards"));
                continue;
            };
            if owner == self.self_machine {
                // Already queried via `self.local` above; querying ourselves
                // again over transport would just loop back here.
                continue;
            }
            let Some(owner_location) = self.local_machine_location(owner) else {
                continue;
            };
            match retry_transient(&self.config, cancel, || {
                self.transport.get_locations(&owner_location, std::slice::from_ref(&hash), cancel)
            })
            .await
            {
                Ok(remote) => merge_into(&mut merged, &remote),
                Err(ErrorKind::Cancelled) => return TrackerOutcome::Cancelled,
                Err(err) => diagnostics.push(tracker_core::Diagnostic::new("dht-owner", err.to_string())),
            }
        }

        if diagnostics.is_empty() {
            TrackerOutcome::Success(merged)
        } else if merged.iter().any(|e| !e.is_empty()) {
            TrackerOutcome::SuccessWithWarnings(merged, diagnostics)
        } else {
            let first = diagnostics.first().map_or(ErrorKind::NoShards, |_| ErrorKind::transient("all hops failed"));
            TrackerOutcome::Failure(first, diagnostics)
        }
    }

    /// Read-through fallback consulted after a ring is removed (S4): true if
    /// the merged tracker result or the backing store believes the hash
    /// exists.
    pub async fn might_exist(&self, hash: &Hash, cancel: &CancellationToken) -> bool {
        match self.get_locations(std::slice::from_ref(hash), cancel).await {
            TrackerOutcome::Success(entries) | TrackerOutcome::SuccessWithWarnings(entries, _) => {
                if entries.iter().any(|e| !e.is_empty()) {
                    return true;
                }
                self.backing_store.might_exist(hash).await
            }
            _ => self.backing_store.might_exist(hash).await,
        }
    }
}

/// Merges each remote entry into the `merged` entry with the same hash.
/// `remote` is often a strict subset of `merged` (only the hashes a hop was
/// actually asked about), so the two never line up positionally.
fn merge_into(merged: &mut [ContentEntry], remote: &[ContentEntry]) {
    for incoming in remote {
        if let Some(local) = merged.iter_mut().find(|e| e.hash == incoming.hash) {
            *local = local.merge(incoming);
        }
    }
}

#[async_trait]
impl ContentTracker for DistributedTracker {
    /// RPC entry point for an incoming `UpdateLocations` call (§4.7): merges
    /// into the local tracker, then relays each entry to its DHT shard owner
    /// (§4.6 step 3) unless this machine already owns that shard. This is
    /// what makes a ring leader actually forward a worker's change onward
    /// instead of only caching it; a forwarding failure is logged and
    /// swallowed; step 3 never fails the worker's own already-successful
    /// local mint.
    async fn update_locations(&self, entries: Vec<ContentEntry>) -> Result<(), ErrorKind> {
        self.local.update_locations(entries.clone());
        let cancel = CancellationToken::new();
        for entry in entries {
            if let Err(err) = self.forward_to_dht_owner(entry, &cancel).await {
                warn!(%err, "failed to relay update to dht shard owner");
            }
        }
        Ok(())
    }

    async fn get_locations(&self, hashes: &[Hash]) -> Result<Vec<ContentEntry>, ErrorKind> {
        let cancel = CancellationToken::new();
        match DistributedTracker::get_locations(self, hashes, &cancel).await {
            TrackerOutcome::Success(v) | TrackerOutcome::SuccessWithWarnings(v, _) => Ok(v),
            TrackerOutcome::Failure(err, _) => Err(err),
            TrackerOutcome::Cancelled => Err(ErrorKind::Cancelled),
        }
    }

    fn get_sequence_number(&self, hash: &Hash, machine: MachineId) -> u64 {
        self.local.get_sequence_number(hash, machine)
    }
}

#[async_trait]
impl ContentStoreCallback for DistributedTracker {
    /// Feeds a local filesystem add reported by the (external, out of scope)
    /// content store into `process_local_change` (§6). A failed outcome is
    /// logged, not propagated: the callback interface has no return channel
    /// for the content store to act on.
    async fn on_local_add(&self, hash: &Hash, size: i64) {
        let cancel = CancellationToken::new();
        if let TrackerOutcome::Failure(err, _) = self.process_local_change(Operation::Add, hash.clone(), size, &cancel).await {
            warn!(%err, %hash, "failed to propagate local add");
        }
    }

    async fn on_local_delete(&self, hash: &Hash) {
        let cancel = CancellationToken::new();
        if let TrackerOutcome::Failure(err, _) = self.process_local_change(Operation::Delete, hash.clone(), tracker_core::UNKNOWN_SIZE, &cancel).await {
            warn!(%err, %hash, "failed to propagate local delete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullBackingStore;
    use std::sync::Mutex as StdMutex;
    use tracker_core::{ClockSource, VirtualClock};

    struct StubTransport {
        update_calls: StdMutex<Vec<(MachineLocation, Vec<ContentEntry>)>>,
        get_response: Vec<ContentEntry>,
    }

    #[async_trait]
    impl TransportClient for StubTransport {
        async fn update_locations(
            &self,
            target: &MachineLocation,
            entries: Vec<ContentEntry>,
            _cancel: &CancellationToken,
        ) -> Result<(), ErrorKind> {
            self.update_calls.lock().unwrap().push((target.clone(), entries));
            Ok(())
        }

        async fn get_locations(
            &self,
            _target: &MachineLocation,
            _hashes: &[Hash],
            _cancel: &CancellationToken,
        ) -> Result<Vec<ContentEntry>, ErrorKind> {
            Ok(self.get_response.clone())
        }
    }

    fn make_tracker(self_id: MachineId, transport: Arc<StubTransport>) -> (DistributedTracker, Arc<crate::cluster_service::ClusterStateMachine>) {
        let clock: Arc<dyn ClockSource> = Arc::new(VirtualClock::new(0));
        let cluster = Arc::new(crate::cluster_service::ClusterStateMachine::new(
            tracker_core::ClusterConfig::default(),
            Arc::clone(&clock),
        ));
        let shard_manager = Arc::new(ShardManager::new(&cluster));
        let ring_coordinator = Arc::new(RingCoordinator::new(Arc::clone(&cluster)));
        let local = Arc::new(LocalContentTracker::new(4, self_id, clock));
        let tracker = DistributedTracker::new(
            local,
            ring_coordinator,
            shard_manager,
            transport,
            Arc::new(NullBackingStore),
            DistributedTrackerConfig::default(),
            self_id,
        );
        (tracker, cluster)
    }

    #[tokio::test]
    async fn worker_forwards_to_leader() {
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: vec![] });
        let (tracker, cluster) = make_tracker(MachineId(2), Arc::clone(&transport));

        let leader = cluster.register_machine("grpc://leader:1/".into());
        let worker = MachineId(2);
        cluster.force_register_machine(worker, "grpc://worker:1/".into());
        tracker.shard_manager.refresh(&cluster);
        tracker.ring_coordinator.add_ring("r1", vec![leader, worker]);
        tracker.set_ring("r1");

        let cancel = CancellationToken::new();
        let outcome = tracker.process_local_change(Operation::Add, "h".into(), 100, &cancel).await;
        assert!(matches!(outcome, TrackerOutcome::Success(())));
        assert_eq!(transport.update_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn content_store_callback_feeds_process_local_change() {
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: vec![] });
        let (tracker, cluster) = make_tracker(MachineId(1), Arc::clone(&transport));
        cluster.force_register_machine(MachineId(1), "grpc://self:1/".into());
        tracker.shard_manager.refresh(&cluster);

        let h: Hash = "callback-hash".into();
        ContentStoreCallback::on_local_add(&tracker, &h, 99).await;
        assert_eq!(tracker.local.get_sequence_number(&h, MachineId(1)), 1);

        ContentStoreCallback::on_local_delete(&tracker, &h).await;
        assert_eq!(tracker.local.get_sequence_number(&h, MachineId(1)), 2);
    }

    #[tokio::test]
    async fn sole_leader_owns_its_own_shard_and_never_forwards() {
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: vec![] });
        let (tracker, cluster) = make_tracker(MachineId(1), Arc::clone(&transport));
        cluster.force_register_machine(MachineId(1), "grpc://self:1/".into());
        tracker.shard_manager.refresh(&cluster);

        let cancel = CancellationToken::new();
        let outcome = tracker.process_local_change(Operation::Add, "h".into(), 100, &cancel).await;
        assert!(matches!(outcome, TrackerOutcome::Success(())));
        assert_eq!(tracker.local.get_sequence_number(&"h".into(), MachineId(1)), 1);
        assert!(transport.update_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn might_exist_falls_back_to_backing_store_when_empty() {
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: vec![] });
        let (tracker, _cluster) = make_tracker(MachineId(1), transport);
        let cancel = CancellationToken::new();
        assert!(!tracker.might_exist(&"h".into(), &cancel).await);
    }

    #[tokio::test]
    async fn leader_relays_received_update_to_dht_owner() {
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: vec![] });
        let (tracker, cluster) = make_tracker(MachineId(1), Arc::clone(&transport));
        let self_loc: MachineLocation = "grpc://self:1/".into();
        let other_loc: MachineLocation = "grpc://other:1/".into();
        cluster.force_register_machine(MachineId(1), self_loc.clone());
        cluster.force_register_machine(MachineId(2), other_loc.clone());
        tracker.shard_manager.refresh(&cluster);

        let list = tracker_core::ShardList::new(vec![(MachineId(1), self_loc, true), (MachineId(2), other_loc.clone(), true)]);
        let h = (0..2000_u32)
            .map(|i| Hash::from(format!("relay-key-{i}")))
            .find(|h| tracker_core::shard(h, &list).ok() == Some(MachineId(2)))
            .expect("some key should map to the other machine");

        let entry = ContentEntry::single(h, 10, MachineId(2), tracker_core::ChangeStamp::new(1, 0, Operation::Add));
        tracker.update_locations(vec![entry]).await.unwrap();

        let calls = transport.update_calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "receiving leader should relay onward to the actual shard owner");
        assert_eq!(calls[0].0, other_loc);
    }

    #[tokio::test]
    async fn update_received_for_own_shard_is_not_relayed() {
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: vec![] });
        let (tracker, cluster) = make_tracker(MachineId(1), Arc::clone(&transport));
        cluster.force_register_machine(MachineId(1), "grpc://self:1/".into());
        tracker.shard_manager.refresh(&cluster);

        let entry = ContentEntry::single("h".into(), 10, MachineId(1), tracker_core::ChangeStamp::new(1, 0, Operation::Add));
        tracker.update_locations(vec![entry]).await.unwrap();

        assert!(transport.update_calls.lock().unwrap().is_empty(), "already owning the shard should not trigger a self-forward");
    }

    #[tokio::test]
    async fn ring_leader_lookup_of_missing_hash_does_not_self_forward() {
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: vec![] });
        let (tracker, cluster) = make_tracker(MachineId(1), Arc::clone(&transport));
        cluster.force_register_machine(MachineId(1), "grpc://self:1/".into());
        tracker.shard_manager.refresh(&cluster);
        tracker.ring_coordinator.add_ring("r1", vec![MachineId(1)]);
        tracker.set_ring("r1");

        let cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), tracker.get_locations(&["missing".into()], &cancel))
            .await
            .expect("a sole ring leader looking up its own shard must not hang forwarding to itself");
        match outcome {
            TrackerOutcome::Success(entries) => assert!(entries[0].is_empty()),
            other => panic!("expected an empty success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn multi_hash_lookup_merges_remote_result_into_the_matching_hash() {
        // The ring leader is only asked about hashes that are still
        // insufficient locally, so its response is a strict subset of
        // `merged`; merging must match by hash rather than by position.
        let missing_result = vec![ContentEntry::single(
            "missing".into(),
            10,
            MachineId(9),
            tracker_core::ChangeStamp::new(1, 0, Operation::Add),
        )];
        let transport = Arc::new(StubTransport { update_calls: StdMutex::new(Vec::new()), get_response: missing_result });
        let (tracker, cluster) = make_tracker(MachineId(2), Arc::clone(&transport));

        let leader = cluster.register_machine("grpc://leader:1/".into());
        let worker = MachineId(2);
        cluster.force_register_machine(worker, "grpc://worker:1/".into());
        tracker.shard_manager.refresh(&cluster);
        tracker.ring_coordinator.add_ring("r1", vec![leader, worker]);
        tracker.set_ring("r1");

        tracker.local.update_locations(vec![ContentEntry::single(
            "satisfied".into(),
            10,
            MachineId(1),
            tracker_core::ChangeStamp::new(1, 0, Operation::Add),
        )]);

        let cancel = CancellationToken::new();
        let outcome = tracker.get_locations(&["satisfied".into(), "missing".into()], &cancel).await;
        let entries = match outcome {
            TrackerOutcome::Success(entries) | TrackerOutcome::SuccessWithWarnings(entries, _) => entries,
            other => panic!("expected a lookup result, got {other:?}"),
        };

        let satisfied = entries.iter().find(|e| e.hash == Hash::from("satisfied")).unwrap();
        let missing = entries.iter().find(|e| e.hash == Hash::from("missing")).unwrap();
        assert!(satisfied.contains(MachineId(1)), "satisfied entry must keep its own location");
        assert!(!satisfied.contains(MachineId(9)), "remote result for `missing` must not bleed into `satisfied`");
        assert!(missing.contains(MachineId(9)), "remote result for `missing` must merge into its own entry");
    }
}
