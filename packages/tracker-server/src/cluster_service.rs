//! Cluster State Machine service: wraps the pure `tracker_core::ClusterState`
//! value behind `ArcSwap`, fires subscriber events after each mutation, and
//! drives a background liveness sweep.
//!
//! Grounded in the teacher's `cluster::state::ClusterState` (`ArcSwap<MembersView>`
//! plus a `change_tx` broadcast) and `ClusterChannels`/`ClusterChannelReceivers`
//! typed-channel-pair pattern in `cluster/state.rs`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tracing::debug;
use tracker_core::{ClockSource, ClusterConfig, ClusterState, ErrorKind, MachineId, MachineLocation, MachineState};

/// Notification fired after a cluster-state mutation changes its shape.
#[derive(Debug, Clone)]
pub enum ClusterChange {
    MachineRegistered(MachineId),
    MachineStateChanged(MachineId, MachineState),
    AvailabilityChanged,
}

/// Change events buffered per subscriber before the oldest is dropped and
/// `RecvError::Lagged` surfaces. Generous: both subscribers (shard manager,
/// ring coordinator) drain promptly and a sweep emits at most one event per
/// changed record.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// The service wrapper around `ClusterState`: holds the current snapshot,
/// applies mutators, and republishes changes to subscribers.
///
/// Both the shard manager and the ring coordinator need their own stream of
/// every change, so delivery is multi-consumer broadcast rather than a
/// single-consumer queue (§4.3). Delivery is synchronous on the updater's
/// thread; a subscriber that falls more than `CHANGE_CHANNEL_CAPACITY` events
/// behind sees `RecvError::Lagged` on its next `recv()` rather than blocking
/// the mutator.
pub struct ClusterStateMachine {
    state: ArcSwap<ClusterState>,
    config: ClusterConfig,
    clock: Arc<dyn ClockSource>,
    change_tx: broadcast::Sender<ClusterChange>,
}

impl ClusterStateMachine {
    #[must_use]
    pub fn new(config: ClusterConfig, clock: Arc<dyn ClockSource>) -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: ArcSwap::from_pointee(ClusterState::empty()),
            config,
            clock,
            change_tx: tx,
        }
    }

    /// A fresh receiver over this machine's change stream. Any number of
    /// callers may subscribe independently; each gets every event published
    /// from the moment it subscribes onward.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterChange> {
        self.change_tx.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> Arc<ClusterState> {
        self.state.load_full()
    }

    fn publish(&self, change: ClusterChange) {
        let _ = self.change_tx.send(change);
    }

    pub fn register_machine(&self, location: MachineLocation) -> MachineId {
        let now = self.clock.now_millis();
        let current = self.state.load();
        let (next, id) = current.register_machine(&self.config, location, now);
        self.state.store(Arc::new(next));
        debug!(machine_id = %id, "machine registered");
        self.publish(ClusterChange::MachineRegistered(id));
        self.publish(ClusterChange::AvailabilityChanged);
        id
    }

    pub fn force_register_machine(&self, id: MachineId, location: MachineLocation) {
        let now = self.clock.now_millis();
        let current = self.state.load();
        let next = current.force_register_machine(id, location, now);
        self.state.store(Arc::new(next));
        self.publish(ClusterChange::MachineRegistered(id));
        self.publish(ClusterChange::AvailabilityChanged);
    }

    /// # Errors
    /// Returns [`ErrorKind::UnknownMachine`] if `id` has no record.
    pub fn heartbeat(&self, id: MachineId, desired_state: MachineState) -> Result<(), ErrorKind> {
        let now = self.clock.now_millis();
        let current = self.state.load();
        let (next, previous_state) = current.heartbeat(id, now, desired_state)?;
        self.state.store(Arc::new(next));
        if previous_state != desired_state {
            self.publish(ClusterChange::MachineStateChanged(id, desired_state));
            self.publish(ClusterChange::AvailabilityChanged);
        }
        Ok(())
    }

    /// Applies the liveness state machine to every record, publishing
    /// state-change/availability events for any record that moved.
    pub fn transition_inactive(&self) {
        let now = self.clock.now_millis();
        let current = self.state.load();
        let next = current.transition_inactive(&self.config, now);

        let mut any_changed = false;
        for record in next.records() {
            if current.record(record.id).map(|r| r.state) != Some(record.state) {
                any_changed = true;
                self.publish(ClusterChange::MachineStateChanged(record.id, record.state));
            }
        }
        self.state.store(Arc::new(next));
        if any_changed {
            self.publish(ClusterChange::AvailabilityChanged);
        }
    }

    /// Spawns the background liveness-sweep task, ticking at
    /// `heartbeat_interval`. Returns the task handle so `shutdown()` can
    /// abort it.
    pub fn spawn_liveness_sweep(self: &Arc<Self>, heartbeat_interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                this.transition_inactive();
            }
        })
    }
}
