//! Consistent-hashing sharding scheme: maps a content hash to a responsible
//! machine given the current shard list.

use crate::entry::Hash;
use crate::error::ErrorKind;
use crate::hash::combine_hashes;
use crate::machine::{MachineId, MachineLocation};

/// Number of virtual nodes placed on the ring per machine. High enough that
/// the `O(1/N)` resharding-stability bound (§8 item 7) holds statistically
/// even for small shard lists.
pub const DEFAULT_VNODES_PER_MACHINE: u32 = 64;

/// A snapshot of cluster membership as the sharding scheme sees it: an
/// ordered list of machines with their availability, mirroring the shard
/// manager's public view (§4.4).
#[derive(Debug, Clone, Default)]
pub struct ShardList {
    entries: Vec<(MachineId, MachineLocation, bool)>,
    vnodes_per_machine: u32,
}

impl ShardList {
    #[must_use]
    pub fn new(entries: Vec<(MachineId, MachineLocation, bool)>) -> Self {
        Self {
            entries,
            vnodes_per_machine: DEFAULT_VNODES_PER_MACHINE,
        }
    }

    #[must_use]
    pub fn with_vnodes_per_machine(mut self, vnodes: u32) -> Self {
        self.vnodes_per_machine = vnodes;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(|(_, _, available)| *available)
    }

    /// The location registered for `id`, if it's part of this shard list.
    #[must_use]
    pub fn location_of(&self, id: MachineId) -> Option<MachineLocation> {
        self.entries.iter().find(|(entry_id, _, _)| *entry_id == id).map(|(_, location, _)| location.clone())
    }

    fn ring(&self) -> Vec<(u32, MachineId)> {
        let mut ring: Vec<(u32, MachineId)> = self
            .entries
            .iter()
            .filter(|(_, _, available)| *available)
            .flat_map(|(id, location, _)| {
                let loc_hash = crate::hash::fnv1a_hash(location.as_str().as_bytes());
                (0..self.vnodes_per_machine).map(move |v| (combine_hashes(loc_hash, v), *id))
            })
            .collect();
        ring.sort_unstable_by_key(|(h, _)| *h);
        ring
    }
}

/// Deterministically maps `key` to the first available machine whose vnode
/// hash is greater than or equal to `key`'s hash, wrapping around the ring.
///
/// # Errors
/// Returns [`ErrorKind::NoShards`] if no machine in `list` is available.
pub fn shard(key: &Hash, list: &ShardList) -> Result<MachineId, ErrorKind> {
    let ring = list.ring();
    if ring.is_empty() {
        return Err(ErrorKind::NoShards);
    }

    let key_hash = crate::hash::fnv1a_hash(key.as_str().as_bytes());
    let owner = ring
        .iter()
        .find(|(h, _)| *h >= key_hash)
        .or_else(|| ring.first())
        .map(|(_, id)| *id)
        .expect("ring is non-empty");

    Ok(owner)
}
