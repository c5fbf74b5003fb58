//! Machine identity, location, and liveness record types.

use serde::{Deserialize, Serialize};

/// A small dense non-zero integer identifying a machine within a cluster.
///
/// Ids are assigned densely starting at 1 so they can index directly into
/// compact arrays (shard rings, vnode tables) without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub u32);

impl MachineId {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A canonicalized machine location string, e.g. `grpc://host:port/`.
///
/// This is an opaque transport address as far as `tracker-core` is
/// concerned: no scheme validation or connection semantics live here, only
/// equality/hashing/ordering so it can key the shard ring.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineLocation(pub String);

impl MachineLocation {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MachineLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MachineLocation {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MachineLocation {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Liveness state of a registered machine.
///
/// `Open` and `Closed` are both "available" for shard placement (§4.4);
/// `DeadUnavailable` and `DeadExpired` are not. `DeadUnavailable` is a
/// transient unreachability verdict (the machine may come back and resume
/// its id); `DeadExpired` means the heartbeat deadline passed with no
/// recovery and the id becomes eligible for reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MachineState {
    Open,
    Closed,
    DeadUnavailable,
    DeadExpired,
}

impl MachineState {
    /// Whether a machine in this state may be chosen as a shard owner.
    #[must_use]
    pub fn is_available(self) -> bool {
        matches!(self, MachineState::Open | MachineState::Closed)
    }

    /// Whether a machine in this state is dead in either sense.
    #[must_use]
    pub fn is_dead(self) -> bool {
        matches!(self, MachineState::DeadUnavailable | MachineState::DeadExpired)
    }
}

/// A registered machine's full record in the cluster state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub id: MachineId,
    pub location: MachineLocation,
    pub state: MachineState,
    pub last_heartbeat_millis: i64,
}

impl MachineRecord {
    #[must_use]
    pub fn new(id: MachineId, location: MachineLocation, last_heartbeat_millis: i64) -> Self {
        Self {
            id,
            location,
            state: MachineState::Open,
            last_heartbeat_millis,
        }
    }
}
