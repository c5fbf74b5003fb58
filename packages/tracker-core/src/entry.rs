//! Content Entry: the merged per-hash location record and its CRDT merge algebra.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::machine::MachineId;
use crate::stamp::{ChangeStamp, Operation, Stamped};

/// A content-addressed key. Opaque to `tracker-core`: no hashing algorithm is
/// assumed, only byte-equality and ordering (so it can key a `BTreeMap`/shard
/// ring lookup).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(pub String);

impl Hash {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Hash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Hash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel for "size unknown".
pub const UNKNOWN_SIZE: i64 = -1;

/// The merged per-hash record of which machines hold (or recently held) a
/// piece of content.
///
/// `operations` keeps at most one surviving [`Stamped`] per machine — the one
/// with the greatest [`ChangeStamp`] under merge. Machines are stored in a
/// `BTreeMap` keyed by [`MachineId`] so iteration order (and therefore
/// serialized byte layout) is deterministic across replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub hash: Hash,
    pub size: i64,
    operations: BTreeMap<MachineId, Stamped<()>>,
}

impl ContentEntry {
    /// A fresh entry with no recorded operations.
    #[must_use]
    pub fn new(hash: Hash, size: i64) -> Self {
        Self {
            hash,
            size,
            operations: BTreeMap::new(),
        }
    }

    /// An entry recording a single stamped operation by one machine.
    #[must_use]
    pub fn single(hash: Hash, size: i64, machine: MachineId, stamp: ChangeStamp) -> Self {
        let mut operations = BTreeMap::new();
        operations.insert(machine, Stamped::new(stamp, ()));
        Self { hash, size, operations }
    }

    /// Merges `self` with `other` (same hash) per the entry merge algebra:
    /// size takes the max treating `-1` as unknown, and for each machine the
    /// operation with the greatest change stamp survives.
    ///
    /// Idempotent, commutative, associative — see the `proptest` properties
    /// below.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        debug_assert_eq!(self.hash, other.hash, "merge requires equal hash");

        let size = match (self.size, other.size) {
            (UNKNOWN_SIZE, b) => b,
            (a, UNKNOWN_SIZE) => a,
            (a, b) => a.max(b),
        };

        let mut operations = self.operations.clone();
        for (machine, stamped) in &other.operations {
            operations
                .entry(*machine)
                .and_modify(|existing| {
                    if stamped.stamp > existing.stamp {
                        *existing = stamped.clone();
                    }
                })
                .or_insert_with(|| stamped.clone());
        }

        Self {
            hash: self.hash.clone(),
            size,
            operations,
        }
    }

    /// Records a single stamped operation from `machine`, merging it into
    /// this entry in place.
    pub fn apply(&mut self, machine: MachineId, stamp: ChangeStamp, size: i64) {
        let merged = self.merge(&ContentEntry::single(self.hash.clone(), size, machine, stamp));
        *self = merged;
    }

    /// Machines whose latest stamped operation is `Add` — i.e. currently
    /// believed to hold this content.
    pub fn locations(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.operations
            .iter()
            .filter(|(_, s)| s.stamp.operation == Operation::Add)
            .map(|(m, _)| *m)
    }

    /// Whether `machine` currently holds this content (latest op is `Add`).
    #[must_use]
    pub fn contains(&self, machine: MachineId) -> bool {
        self.operations
            .get(&machine)
            .is_some_and(|s| s.stamp.operation == Operation::Add)
    }

    /// Whether `machine`'s latest recorded op is a tombstone (`Delete`).
    #[must_use]
    pub fn is_tombstoned_for(&self, machine: MachineId) -> bool {
        self.operations
            .get(&machine)
            .is_some_and(|s| s.stamp.operation == Operation::Delete)
    }

    /// True when every recorded operation is a tombstone (or there are none).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations
            .values()
            .all(|s| s.stamp.operation == Operation::Delete)
    }

    /// Highest sequence number recorded for `machine` on this entry, or 0 if none.
    #[must_use]
    pub fn sequence_number_for(&self, machine: MachineId) -> u64 {
        self.operations
            .get(&machine)
            .map_or(0, |s| s.stamp.sequence_number)
    }
}
