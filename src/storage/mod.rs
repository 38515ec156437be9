//! storage layer for txchain
//!
//! An identity-mapped, in-memory record store. It backs the reference
//! executor in [`crate::transaction::MemoryTransactor`] and provides the value
//! types every pipeline stage works with. Nothing here is persisted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MemoryStore                            │
//! │     (committed objects, id allocation, serialized apply)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   entity    │       │  ChangeSet  │       │    types    │
//!  │ (objects)   │       │ (tracking)  │       │ (Oid, ...)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```

mod changes;
mod entity;
mod error;
mod store;
mod types;

// Re-export public API
pub use changes::ChangeSet;
pub use entity::{downcast, downcast_ref, AsAny, DeleteAware, Entity};
pub use error::StorageError;
pub use store::{MemoryStore, ObjectMap, Snapshot, StoreStats, WriteSet};
pub use types::{Change, ChangeType, EntityType, Oid};

// Re-export for internal use by other modules
pub(crate) use store::identity;
