//! Delete notification stage.
//!
//! Objects implementing [`DeleteAware`](crate::storage::DeleteAware) are told
//! about their deletion right before it happens, inside the deleting
//! transaction.

use std::sync::Arc;

use tracing::trace;

use crate::pipeline::decorator::{Decorated, Decorator};
use crate::storage::{Change, Entity, EntityType, Oid};
use crate::transaction::{DatabaseContext, DbContext, TransactResult, Transactor};

/// Decorator that wraps every context in an [`OnDeleteContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OnDelete;

/// Transactor with delete notification.
pub type OnDeleteTransactor<I> = Decorated<OnDelete, I>;

impl OnDelete {
    pub fn transactor<I: Transactor>(inner: I) -> OnDeleteTransactor<I> {
        Decorated::new(OnDelete, inner)
    }
}

impl Decorator for OnDelete {
    type State = ();

    fn enter_transactor_context(&self) {}

    fn enter_database_context(&self, _state: &mut (), db: DbContext) -> DbContext {
        Arc::new(OnDeleteContext { inner: db })
    }
}

/// Context that runs `on_delete` before delegating a delete.
pub struct OnDeleteContext {
    inner: DbContext,
}

impl DatabaseContext for OnDeleteContext {
    fn transaction_id(&self) -> &str {
        self.inner.transaction_id()
    }

    fn insert(&self, entity: Arc<dyn Entity>) -> TransactResult<Oid> {
        self.inner.insert(entity)
    }

    fn get(&self, oid: Oid) -> TransactResult<Arc<dyn Entity>> {
        self.inner.get(oid)
    }

    fn oid_of(&self, entity: &Arc<dyn Entity>) -> TransactResult<Oid> {
        self.inner.oid_of(entity)
    }

    fn update(&self, oid: Oid, entity: Arc<dyn Entity>) -> TransactResult<()> {
        self.inner.update(oid, entity)
    }

    fn delete(&self, oid: Oid) -> TransactResult<()> {
        let entity = self.inner.get(oid)?;
        if let Some(aware) = entity.as_delete_aware() {
            trace!(tx_id = %self.transaction_id(), %oid, "notifying object of delete");
            aware.on_delete(self)?;
        }
        self.inner.delete(oid)
    }

    fn changes(&self) -> TransactResult<Vec<Change>> {
        self.inner.changes()
    }

    fn declared_type(&self, oid: Oid) -> TransactResult<Option<EntityType>> {
        self.inner.declared_type(oid)
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn rollback(&self) -> TransactResult<()> {
        self.inner.rollback()
    }

    fn restart(&self) -> TransactResult<()> {
        self.inner.restart()
    }

    fn is_nested(&self) -> bool {
        self.inner.is_nested()
    }
}
