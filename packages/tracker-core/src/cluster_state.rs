//! The cluster-state machine: a pure, immutable-value API over machine
//! registration and liveness.
//!
//! Every mutator takes a `ClusterState` by reference and returns a new
//! `ClusterState` plus an output value — no method mutates in place. This
//! mirrors the teacher's `ClusterState`/`ClusterPartitionTable` copy-on-write
//! design (`tracker-server`'s service layer wraps this value in `ArcSwap` and
//! fires subscriber events after each transition; that wrapping lives outside
//! this crate, which stays I/O-free).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::machine::{MachineId, MachineLocation, MachineRecord, MachineState};

/// Inactivity thresholds (in milliseconds) driving [`transition_inactive`] and
/// id reclamation. Field names mirror the configuration keys in the host
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    pub active_to_closed_millis: i64,
    pub active_to_expired_millis: i64,
    pub closed_to_expired_millis: i64,
    pub active_to_unavailable_millis: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            active_to_closed_millis: 30_000,
            active_to_expired_millis: 300_000,
            closed_to_expired_millis: 120_000,
            active_to_unavailable_millis: 60_000,
        }
    }
}

/// An immutable snapshot of cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    next_machine_id: u32,
    records: BTreeMap<MachineId, MachineRecord>,
}

impl ClusterState {
    /// A cluster with no registered machines; the first id handed out is 1.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            next_machine_id: 1,
            records: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn next_machine_id(&self) -> u32 {
        self.next_machine_id
    }

    #[must_use]
    pub fn record(&self, id: MachineId) -> Option<&MachineRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &MachineRecord> {
        self.records.values()
    }

    fn record_for_location(&self, location: &MachineLocation) -> Option<&MachineRecord> {
        self.records.values().find(|r| &r.location == location)
    }

    /// Smallest reclaimable id: a record in a dead state whose elapsed
    /// inactivity is at least the reclaim threshold. Records still `Open` or
    /// `Closed` are never reclaimable, regardless of elapsed time — this is
    /// the safety rule from §8 item 6 and the spec's Open Questions note.
    fn reclaimable_id(&self, now: i64, config: &ClusterConfig) -> Option<MachineId> {
        self.records
            .values()
            .filter(|r| r.state.is_dead())
            .filter(|r| now - r.last_heartbeat_millis >= config.active_to_unavailable_millis)
            .map(|r| r.id)
            .min()
    }

    /// Registers `location`, returning the (possibly new) cluster state and
    /// the machine id it now owns.
    ///
    /// If `location` already holds a record in `{Open, Closed}`, that id is
    /// returned unchanged. Otherwise a reclaimable dead id is reused if one
    /// exists; failing that, `next_machine_id` is allocated and incremented.
    #[must_use]
    pub fn register_machine(
        &self,
        config: &ClusterConfig,
        location: MachineLocation,
        now: i64,
    ) -> (Self, MachineId) {
        if let Some(existing) = self.record_for_location(&location) {
            if existing.state.is_available() {
                return (self.clone(), existing.id);
            }
        }

        let mut next = self.clone();

        let id = if let Some(reclaimed) = self.reclaimable_id(now, config) {
            reclaimed
        } else {
            let id = MachineId(next.next_machine_id);
            next.next_machine_id += 1;
            id
        };

        next.records.insert(id, MachineRecord::new(id, location, now));
        (next, id)
    }

    /// Unconditional upsert of a record at a caller-specified id, raising
    /// `next_machine_id` so future allocations never collide with it. Used
    /// only for migration from a legacy id scheme.
    #[must_use]
    pub fn force_register_machine(
        &self,
        id: MachineId,
        location: MachineLocation,
        now: i64,
    ) -> Self {
        let mut next = self.clone();
        next.records.insert(id, MachineRecord::new(id, location, now));
        next.next_machine_id = next.next_machine_id.max(id.get() + 1);
        next
    }

    /// Updates `id`'s last-heartbeat time and state, returning the new state
    /// value and the record's previous state.
    ///
    /// # Errors
    /// Returns [`ErrorKind::UnknownMachine`] if `id` has no record.
    pub fn heartbeat(
        &self,
        id: MachineId,
        now: i64,
        desired_state: MachineState,
    ) -> Result<(Self, MachineState), ErrorKind> {
        let Some(existing) = self.records.get(&id) else {
            return Err(ErrorKind::UnknownMachine);
        };
        let previous_state = existing.state;

        let mut next = self.clone();
        if let Some(record) = next.records.get_mut(&id) {
            record.last_heartbeat_millis = now;
            record.state = desired_state;
        }

        Ok((next, previous_state))
    }

    /// Applies the liveness state machine to every record.
    ///
    /// Evaluates the `expired` transitions before `closed` so a record
    /// inactive long enough skips straight from `Open` to `DeadExpired`
    /// rather than passing through `Closed`.
    #[must_use]
    pub fn transition_inactive(&self, config: &ClusterConfig, now: i64) -> Self {
        let mut next = self.clone();
        for record in next.records.values_mut() {
            let elapsed = now - record.last_heartbeat_millis;
            record.state = match record.state {
                MachineState::Open if elapsed >= config.active_to_expired_millis => {
                    MachineState::DeadExpired
                }
                MachineState::Open if elapsed >= config.active_to_unavailable_millis => {
                    MachineState::DeadUnavailable
                }
                MachineState::Open if elapsed >= config.active_to_closed_millis => {
                    MachineState::Closed
                }
                MachineState::Closed if elapsed >= config.closed_to_expired_millis => {
                    MachineState::DeadExpired
                }
                other => other,
            };
        }
        next
    }

    /// Registers every location in turn, returning the final state and the
    /// ids assigned in the same order as `locations`.
    ///
    /// Reclamation safety is inherited unchanged from [`register_machine`]:
    /// applying registrations one at a time (rather than batching lookups)
    /// ensures a location registered earlier in the same call is visible to
    /// the reclaimability check for a later one.
    #[must_use]
    pub fn register_many(
        &self,
        config: &ClusterConfig,
        locations: impl IntoIterator<Item = MachineLocation>,
        now: i64,
    ) -> (Self, Vec<MachineId>) {
        let mut state = self.clone();
        let mut ids = Vec::new();
        for location in locations {
            let (next, id) = state.register_machine(config, location, now);
            state = next;
            ids.push(id);
        }
        (state, ids)
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::empty()
    }
}
