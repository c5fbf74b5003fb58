//! Ring: a small group of machines cooperating on one build, with a
//! designated leader.

use serde::{Deserialize, Serialize};

use crate::machine::MachineId;

/// A ring's identity and ordered builder list. `leader()` is always
/// `builders[0]`; there is no election protocol beyond list order (§4.5) — if
/// the leader departs, the coordinator that owns this value removes it and
/// the next builder becomes leader by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    pub id: String,
    pub builders: Vec<MachineId>,
}

impl Ring {
    #[must_use]
    pub fn new(id: impl Into<String>, builders: Vec<MachineId>) -> Self {
        Self { id: id.into(), builders }
    }

    /// The current leader, or `None` for an empty ring (a ring with no
    /// builders left, e.g. all promoted away after repeated departures).
    #[must_use]
    pub fn leader(&self) -> Option<MachineId> {
        self.builders.first().copied()
    }

    /// Removes `id` from the builder list, promoting the next builder to
    /// leader if `id` was the leader. No-op if `id` is not a builder.
    pub fn remove_builder(&mut self, id: MachineId) {
        self.builders.retain(|&b| b != id);
    }

    #[must_use]
    pub fn contains(&self, id: MachineId) -> bool {
        self.builders.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_is_first_builder() {
        let ring = Ring::new("r1", vec![MachineId(3), MachineId(1), MachineId(2)]);
        assert_eq!(ring.leader(), Some(MachineId(3)));
    }

    #[test]
    fn removing_leader_promotes_next() {
        let mut ring = Ring::new("r1", vec![MachineId(3), MachineId(1), MachineId(2)]);
        ring.remove_builder(MachineId(3));
        assert_eq!(ring.leader(), Some(MachineId(1)));
    }

    #[test]
    fn removing_all_builders_leaves_no_leader() {
        let mut ring = Ring::new("r1", vec![MachineId(1)]);
        ring.remove_builder(MachineId(1));
        assert_eq!(ring.leader(), None);
    }

    #[test]
    fn removing_non_builder_is_noop() {
        let mut ring = Ring::new("r1", vec![MachineId(1), MachineId(2)]);
        ring.remove_builder(MachineId(99));
        assert_eq!(ring.builders, vec![MachineId(1), MachineId(2)]);
    }
}
