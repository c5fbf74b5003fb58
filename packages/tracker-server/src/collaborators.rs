//! External collaborator interfaces (§6/§9): capability traits for the
//! content store, the backing persistent cache, and dynamic dispatch over
//! content-tracker implementations.
//!
//! Null implementations follow the teacher's `storage/datastores/null.rs`
//! pattern: a no-op double for every pluggable trait, used as the default
//! when no real collaborator is wired in, and in tests.

use async_trait::async_trait;

use tracker_core::{ContentEntry, ContentHash as Hash, ErrorKind, MachineId};

/// Callbacks the (external, out-of-scope) content store invokes on local
/// filesystem changes, feeding `DistributedTracker::process_local_change`.
#[async_trait]
pub trait ContentStoreCallback: Send + Sync {
    async fn on_local_add(&self, hash: &Hash, size: i64);
    async fn on_local_delete(&self, hash: &Hash);
}

/// No-op content store callback; the default when no store is wired in.
pub struct NullContentStoreCallback;

#[async_trait]
impl ContentStoreCallback for NullContentStoreCallback {
    async fn on_local_add(&self, _hash: &Hash, _size: i64) {}
    async fn on_local_delete(&self, _hash: &Hash) {}
}

/// Read-through fallback to the (external, out-of-scope) backing persistent
/// cache, consulted after a ring is removed and the DHT has no record.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Whether `hash` might still exist in the backing store. A `false`
    /// answer is authoritative; `true` only means "check the real store".
    async fn might_exist(&self, hash: &Hash) -> bool;
}

/// Backing store double that never claims anything exists.
pub struct NullBackingStore;

#[async_trait]
impl BackingStore for NullBackingStore {
    async fn might_exist(&self, _hash: &Hash) -> bool {
        false
    }
}

/// In-memory backing store double for scenario tests (S4/S5): tracks a set
/// of hashes that "exist" without any real persistence.
#[derive(Default)]
pub struct HashSetBackingStore {
    known: parking_lot::Mutex<std::collections::HashSet<Hash>>,
}

impl HashSetBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: Hash) {
        self.known.lock().insert(hash);
    }
}

#[async_trait]
impl BackingStore for HashSetBackingStore {
    async fn might_exist(&self, hash: &Hash) -> bool {
        self.known.lock().contains(hash)
    }
}

/// The capability set shared by local, distributed, and stub trackers (§9
/// "Dynamic dispatch over content-tracker implementations"): a distributed
/// tracker composes a local tracker and a transport client behind this same
/// interface rather than inheriting from it.
#[async_trait]
pub trait ContentTracker: Send + Sync {
    async fn update_locations(&self, entries: Vec<ContentEntry>) -> Result<(), ErrorKind>;
    async fn get_locations(&self, hashes: &[Hash]) -> Result<Vec<ContentEntry>, ErrorKind>;
    fn get_sequence_number(&self, hash: &Hash, machine: MachineId) -> u64;
}

/// A stub tracker that records calls and returns canned, empty results.
/// Used in tests that exercise routing logic without a real local tracker.
#[derive(Default)]
pub struct StubContentTracker {
    pub update_calls: parking_lot::Mutex<Vec<Vec<ContentEntry>>>,
}

#[async_trait]
impl ContentTracker for StubContentTracker {
    async fn update_locations(&self, entries: Vec<ContentEntry>) -> Result<(), ErrorKind> {
        self.update_calls.lock().push(entries);
        Ok(())
    }

    async fn get_locations(&self, hashes: &[Hash]) -> Result<Vec<ContentEntry>, ErrorKind> {
        Ok(hashes
            .iter()
            .map(|h| ContentEntry::new(h.clone(), tracker_core::UNKNOWN_SIZE))
            .collect())
    }

    fn get_sequence_number(&self, _hash: &Hash, _machine: MachineId) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_backing_store_never_claims_existence() {
        let store = NullBackingStore;
        assert!(!store.might_exist(&"h".into()).await);
    }

    #[tokio::test]
    async fn hashset_backing_store_tracks_insertions() {
        let store = HashSetBackingStore::new();
        let h: Hash = "h".into();
        assert!(!store.might_exist(&h).await);
        store.insert(h.clone());
        assert!(store.might_exist(&h).await);
    }

    #[tokio::test]
    async fn null_content_store_callback_is_inert() {
        let cb = NullContentStoreCallback;
        cb.on_local_add(&"h".into(), 10).await;
        cb.on_local_delete(&"h".into()).await;
    }

    #[tokio::test]
    async fn stub_tracker_records_updates() {
        let stub = StubContentTracker::default();
        let entry = ContentEntry::new("h".into(), 10);
        stub.update_locations(vec![entry]).await.unwrap();
        assert_eq!(stub.update_calls.lock().len(), 1);
    }
}
