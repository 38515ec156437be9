//! Database context of the in-memory executor.
//!
//! Each transaction reads from the committed snapshot taken when it began
//! (or last restarted) overlaid with its own pending writes. Writes stay in
//! the transaction's write set until commit applies them to the store.
//! After commit or rollback the context is detached and every operation
//! fails with [`TransactError::NoTransaction`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::storage::{
    identity, Change, ChangeSet, Entity, EntityType, MemoryStore, Oid, Snapshot, StorageError,
    WriteSet,
};
use crate::transaction::context::DatabaseContext;
use crate::transaction::error::{TransactError, TransactResult};

/// Transaction metadata tracked by the executor.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// Unique transaction ID.
    pub tx_id: String,
    /// Whether the transaction rejects writes.
    pub read_only: bool,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
    /// How many times the transaction was restarted.
    pub restarts: u32,
}

/// Active transactions tracked by ID.
pub(crate) type ActiveTransactions = Arc<RwLock<HashMap<String, TransactionMetadata>>>;

struct TxState {
    metadata: TransactionMetadata,
    snapshot: Arc<Snapshot>,
    writes: WriteSet,
    /// identity -> id of objects written by this transaction
    written: HashMap<usize, Oid>,
    changes: ChangeSet,
}

impl TxState {
    fn new(metadata: TransactionMetadata, snapshot: Arc<Snapshot>) -> Self {
        Self {
            metadata,
            snapshot,
            writes: WriteSet::new(),
            written: HashMap::new(),
            changes: ChangeSet::new(),
        }
    }

    fn visible(&self, oid: Oid) -> Option<Arc<dyn Entity>> {
        match self.writes.get(&oid) {
            Some(write) => write.clone(),
            None => self.snapshot.get(oid).cloned(),
        }
    }

    /// Id the object is visible under, by identity.
    fn find(&self, entity: &Arc<dyn Entity>) -> Option<Oid> {
        let key = identity(entity);
        let pending = self.written.get(&key).copied().filter(|oid| {
            matches!(self.writes.get(oid), Some(Some(stored)) if Arc::ptr_eq(stored, entity))
        });
        pending.or_else(|| {
            self.snapshot
                .oid_of(entity)
                .filter(|oid| !self.writes.contains_key(oid))
        })
    }

    fn write(&mut self, oid: Oid, entity: Arc<dyn Entity>) {
        self.written.insert(identity(&entity), oid);
        self.writes.insert(oid, Some(entity));
    }
}

/// A transaction of the in-memory executor.
pub struct MemoryContext {
    tx_id: String,
    read_only: bool,
    store: MemoryStore,
    active: ActiveTransactions,
    /// `None` once the transaction committed or rolled back.
    state: Mutex<Option<TxState>>,
}

impl MemoryContext {
    pub(crate) fn begin(
        store: MemoryStore,
        active: ActiveTransactions,
        tx_id: String,
        read_only: bool,
    ) -> Self {
        let metadata = TransactionMetadata {
            tx_id: tx_id.clone(),
            read_only,
            started_at: Utc::now(),
            restarts: 0,
        };

        active.write().insert(tx_id.clone(), metadata.clone());
        debug!(tx_id = %tx_id, read_only, "transaction started");

        Self {
            tx_id,
            read_only,
            state: Mutex::new(Some(TxState::new(metadata, store.snapshot()))),
            store,
            active,
        }
    }

    /// Whether the context is still attached to an open transaction.
    pub fn is_attached(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Metadata of the open transaction.
    pub fn metadata(&self) -> Option<TransactionMetadata> {
        self.state.lock().as_ref().map(|state| state.metadata.clone())
    }

    /// Commit the transaction and detach the context.
    ///
    /// Fails with `RolledBack` when the transaction was already rolled back,
    /// and with a storage `WriteConflict` when a concurrent commit wrote one
    /// of the same objects first. Nothing is applied in either case.
    pub(crate) fn commit(&self) -> TransactResult<()> {
        let state = self.state.lock().take().ok_or_else(|| TransactError::RolledBack {
            tx_id: self.tx_id.clone(),
        })?;
        self.active.write().remove(&self.tx_id);

        let elapsed_ms = (Utc::now() - state.metadata.started_at).num_milliseconds();
        if self.read_only {
            debug!(tx_id = %self.tx_id, elapsed_ms, "read-only transaction released");
            return Ok(());
        }

        let writes = state.writes.len();
        let version = self.store.apply(state.snapshot.version(), state.writes)?;
        debug!(tx_id = %self.tx_id, writes, version, elapsed_ms, "transaction committed");
        Ok(())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TxState) -> TransactResult<R>) -> TransactResult<R> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(TransactError::NoTransaction)?;
        f(state)
    }

    fn with_writable_state<R>(
        &self,
        f: impl FnOnce(&mut TxState) -> TransactResult<R>,
    ) -> TransactResult<R> {
        self.with_state(|state| {
            if state.metadata.read_only {
                return Err(TransactError::ReadOnly {
                    tx_id: state.metadata.tx_id.clone(),
                });
            }
            f(state)
        })
    }
}

impl DatabaseContext for MemoryContext {
    fn transaction_id(&self) -> &str {
        &self.tx_id
    }

    fn insert(&self, entity: Arc<dyn Entity>) -> TransactResult<Oid> {
        self.with_writable_state(|state| {
            if let Some(existing) = state.find(&entity) {
                return Err(StorageError::AlreadyStored(existing).into());
            }

            let oid = self.store.allocate_oid();
            state.write(oid, entity);
            state.changes.record_insert(oid);
            Ok(oid)
        })
    }

    fn get(&self, oid: Oid) -> TransactResult<Arc<dyn Entity>> {
        self.with_state(|state| {
            state
                .visible(oid)
                .ok_or_else(|| StorageError::ObjectNotFound(oid).into())
        })
    }

    fn oid_of(&self, entity: &Arc<dyn Entity>) -> TransactResult<Oid> {
        self.with_state(|state| {
            state
                .find(entity)
                .ok_or_else(|| StorageError::NotStored.into())
        })
    }

    fn update(&self, oid: Oid, entity: Arc<dyn Entity>) -> TransactResult<()> {
        self.with_writable_state(|state| {
            if state.visible(oid).is_none() {
                return Err(StorageError::ObjectNotFound(oid).into());
            }

            state.write(oid, entity);
            state.changes.record_update(oid);
            Ok(())
        })
    }

    fn delete(&self, oid: Oid) -> TransactResult<()> {
        self.with_writable_state(|state| {
            if state.visible(oid).is_none() {
                return Err(StorageError::ObjectNotFound(oid).into());
            }

            state.writes.insert(oid, None);
            state.changes.record_delete(oid);
            Ok(())
        })
    }

    fn changes(&self) -> TransactResult<Vec<Change>> {
        self.with_state(|state| Ok(state.changes.changes()))
    }

    fn declared_type(&self, oid: Oid) -> TransactResult<Option<EntityType>> {
        self.with_state(|state| Ok(state.visible(oid).map(|entity| entity.declared_type())))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn rollback(&self) -> TransactResult<()> {
        if let Some(state) = self.state.lock().take() {
            self.active.write().remove(&self.tx_id);
            debug!(
                tx_id = %self.tx_id,
                discarded = state.writes.len(),
                "transaction rolled back"
            );
        }
        Ok(())
    }

    fn restart(&self) -> TransactResult<()> {
        self.with_state(|state| {
            state.snapshot = self.store.snapshot();
            state.writes.clear();
            state.written.clear();
            state.changes.clear();
            state.metadata.restarts += 1;
            debug!(tx_id = %self.tx_id, restarts = state.metadata.restarts, "transaction restarted");
            Ok(())
        })?;

        let metadata = self.metadata();
        if let Some(metadata) = metadata {
            self.active.write().insert(self.tx_id.clone(), metadata);
        }
        Ok(())
    }
}

impl Drop for MemoryContext {
    fn drop(&mut self) {
        // A callback that panicked never reached commit or rollback.
        if self.state.get_mut().take().is_some() {
            self.active.write().remove(&self.tx_id);
            debug!(tx_id = %self.tx_id, "transaction dropped without commit");
        }
    }
}

impl std::fmt::Debug for MemoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContext")
            .field("tx_id", &self.tx_id)
            .field("read_only", &self.read_only)
            .field("attached", &self.is_attached())
            .finish()
    }
}
