//! Committed object state of the in-memory record store.
//!
//! Committed state is an immutable [`Snapshot`] behind an `Arc`. Readers take
//! a snapshot by cloning the `Arc`; a commit builds the next snapshot and
//! swaps it in while holding the commit lock, so snapshots are never mutated.
//!
//! Every snapshot remembers the version that last wrote each object id. A
//! commit based on an older snapshot that writes an id changed since then is
//! rejected with [`StorageError::WriteConflict`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::storage::entity::Entity;
use crate::storage::error::StorageError;
use crate::storage::types::Oid;

/// committed objects keyed by id
pub type ObjectMap = BTreeMap<Oid, Arc<dyn Entity>>;

/// Pending writes of one transaction. `None` marks a delete.
pub type WriteSet = BTreeMap<Oid, Option<Arc<dyn Entity>>>;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity key of a stored object: the address of its allocation.
///
/// Only meaningful while something holds the `Arc`.
pub(crate) fn identity(entity: &Arc<dyn Entity>) -> usize {
    Arc::as_ptr(entity) as *const () as usize
}

/// One committed state of the store.
#[derive(Default)]
pub struct Snapshot {
    version: u64,
    objects: ObjectMap,
    /// identity -> id, for every object in `objects`
    identities: HashMap<usize, Oid>,
    /// id -> version of the last commit that inserted, updated or deleted it
    written_at: HashMap<Oid, u64>,
}

impl Snapshot {
    /// Number of the commit that produced this state.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, oid: Oid) -> Option<&Arc<dyn Entity>> {
        self.objects.get(&oid)
    }

    /// Id of a committed object, by identity.
    pub fn oid_of(&self, entity: &Arc<dyn Entity>) -> Option<Oid> {
        self.identities.get(&identity(entity)).copied()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The first id in `writes` changed by a commit after `base`.
    fn conflict(&self, base: u64, writes: &WriteSet) -> Option<Oid> {
        writes
            .keys()
            .find(|oid| self.written_at.get(oid).is_some_and(|&at| at > base))
            .copied()
    }

    fn next(&self, writes: WriteSet) -> Snapshot {
        let version = self.version + 1;
        let mut objects = self.objects.clone();
        let mut identities = self.identities.clone();
        let mut written_at = self.written_at.clone();

        for (oid, write) in writes {
            if let Some(previous) = objects.remove(&oid) {
                identities.remove(&identity(&previous));
            }
            if let Some(entity) = write {
                identities.insert(identity(&entity), oid);
                objects.insert(oid, entity);
            }
            written_at.insert(oid, version);
        }

        Snapshot {
            version,
            objects,
            identities,
            written_at,
        }
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("objects", &self.objects.len())
            .finish()
    }
}

/// Shared, thread-safe object store.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Process-unique id, used to tell stores apart in flow-local state.
    id: u64,
    committed: RwLock<Arc<Snapshot>>,
    next_oid: AtomicU64,
    commit_lock: Mutex<()>,
}

/// Basic statistics about the committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub objects: usize,
    pub version: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryStoreInner {
                id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
                committed: RwLock::new(Arc::new(Snapshot::default())),
                next_oid: AtomicU64::new(1),
                commit_lock: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Allocate the next object id.
    pub fn allocate_oid(&self) -> Oid {
        Oid(self.inner.next_oid.fetch_add(1, Ordering::Relaxed))
    }

    /// Current committed state.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.committed.read().clone()
    }

    /// Read a committed object.
    pub fn get(&self, oid: Oid) -> Option<Arc<dyn Entity>> {
        self.inner.committed.read().get(oid).cloned()
    }

    /// Apply a write set made against the snapshot of version `base`.
    ///
    /// Commits are serialized; an empty write set leaves the version alone.
    /// Fails without applying anything when an id in `writes` was written by
    /// a commit after `base`.
    pub fn apply(&self, base: u64, writes: WriteSet) -> Result<u64, StorageError> {
        let _guard = self.inner.commit_lock.lock();
        let current = self.snapshot();

        if writes.is_empty() {
            return Ok(current.version);
        }
        if let Some(oid) = current.conflict(base, &writes) {
            debug!(%oid, base, version = current.version, "write conflict");
            return Err(StorageError::WriteConflict(oid));
        }

        let next = current.next(writes);
        let version = next.version;
        *self.inner.committed.write() = Arc::new(next);
        Ok(version)
    }

    pub fn stats(&self) -> StoreStats {
        let committed = self.inner.committed.read();
        StoreStats {
            objects: committed.len(),
            version: committed.version,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("id", &self.inner.id)
            .field("stats", &self.stats())
            .finish()
    }
}
