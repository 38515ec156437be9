//! The database context handed to every transaction callback.
//!
//! A context is a view of one open transaction. Pipeline stages may wrap
//! the context they receive (to intercept deletes, to mark nesting) and pass
//! the wrapper on; every wrapper forwards to the same real transaction.

use std::sync::Arc;

use crate::storage::{downcast, Change, Entity, EntityType, Oid, StorageError};
use crate::transaction::error::TransactResult;

/// Shared handle to a database context.
pub type DbContext = Arc<dyn DatabaseContext>;

/// Operations available inside a transaction.
pub trait DatabaseContext: Send + Sync {
    /// Id of the underlying transaction.
    fn transaction_id(&self) -> &str;

    /// Store a new object and return its id.
    fn insert(&self, entity: Arc<dyn Entity>) -> TransactResult<Oid>;

    /// Read an object visible to this transaction.
    fn get(&self, oid: Oid) -> TransactResult<Arc<dyn Entity>>;

    /// Id of a stored object, by identity.
    fn oid_of(&self, entity: &Arc<dyn Entity>) -> TransactResult<Oid>;

    /// Replace the object stored under `oid`.
    fn update(&self, oid: Oid, entity: Arc<dyn Entity>) -> TransactResult<()>;

    /// Delete the object stored under `oid`.
    fn delete(&self, oid: Oid) -> TransactResult<()>;

    /// Changes made so far, in the order the objects were first touched.
    ///
    /// Only valid while the transaction is open.
    fn changes(&self) -> TransactResult<Vec<Change>>;

    /// Declared type of the object stored under `oid`.
    ///
    /// `None` when the object does not exist or was deleted.
    fn declared_type(&self, oid: Oid) -> TransactResult<Option<EntityType>>;

    /// Whether the transaction rejects writes.
    fn is_read_only(&self) -> bool;

    /// Discard all writes and detach the context from the transaction.
    fn rollback(&self) -> TransactResult<()>;

    /// Start over from the latest committed state.
    fn restart(&self) -> TransactResult<()>;

    /// Whether this context belongs to a call that joined an enclosing
    /// transaction.
    fn is_nested(&self) -> bool {
        false
    }
}

/// Typed helpers on top of [`DatabaseContext`].
pub trait DatabaseContextExt: DatabaseContext {
    /// Store a new object, returning its id and a shared handle to it.
    fn insert_new<T: Entity>(&self, entity: T) -> TransactResult<(Oid, Arc<T>)> {
        let entity = Arc::new(entity);
        let oid = self.insert(entity.clone())?;
        Ok((oid, entity))
    }

    /// Read an object as its concrete type.
    fn get_as<T: Entity>(&self, oid: Oid) -> TransactResult<Arc<T>> {
        let entity = self.get(oid)?;
        downcast::<T>(entity).ok_or_else(|| {
            StorageError::TypeMismatch {
                oid,
                expected: std::any::type_name::<T>(),
            }
            .into()
        })
    }

    /// Id of a stored object of concrete type `T`.
    fn oid_of_entity<T: Entity>(&self, entity: &Arc<T>) -> TransactResult<Oid> {
        let entity: Arc<dyn Entity> = entity.clone();
        self.oid_of(&entity)
    }
}

impl<C: DatabaseContext + ?Sized> DatabaseContextExt for C {}
