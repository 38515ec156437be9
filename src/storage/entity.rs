//! Capabilities of stored objects.
//!
//! The store is identity mapped: it holds `Arc<dyn Entity>` handles, and
//! `get` hands back the same allocation that was inserted. Field mutation
//! goes through the entity's own interior mutability; replacing an object
//! through `update` is what the change tracker records.

use std::any::Any;
use std::sync::Arc;

use crate::storage::types::EntityType;
use crate::transaction::{DatabaseContext, TransactResult};

/// Type erasure helpers, implemented for every `Send + Sync + 'static` type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An object that can live in the store.
pub trait Entity: AsAny {
    /// The type hooks are keyed by.
    ///
    /// Defaults to the concrete type. Generated wrappers override this to
    /// report the type they stand in for.
    fn declared_type(&self) -> EntityType {
        EntityType::of::<Self>()
    }

    /// `Some` when the object wants to observe its own deletion.
    fn as_delete_aware(&self) -> Option<&dyn DeleteAware> {
        None
    }
}

/// Receives a callback right before the object is deleted.
///
/// The callback runs inside the deleting transaction and may read or write
/// through `db`. Returning an error aborts the delete.
pub trait DeleteAware {
    fn on_delete(&self, db: &dyn DatabaseContext) -> TransactResult<()>;
}

/// Downcast a shared entity handle to its concrete type.
pub fn downcast<T: Entity>(entity: Arc<dyn Entity>) -> Option<Arc<T>> {
    AsAny::into_any(entity).downcast::<T>().ok()
}

/// Downcast an entity reference to its concrete type.
pub fn downcast_ref<T: Entity>(entity: &dyn Entity) -> Option<&T> {
    AsAny::as_any(entity).downcast_ref::<T>()
}
