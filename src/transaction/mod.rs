//! Transaction contract for txchain.
//!
//! Defines what a unit-of-work executor looks like ([`Transactor`]), what a
//! callback can do inside a transaction ([`DatabaseContext`]), and provides
//! the in-memory reference executor ([`MemoryTransactor`]).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Transactor (trait)                         │
//! │      transact / transact_async / try_transact               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  Memory     │       │  Database   │       │  Transact   │
//!  │ Transactor  │       │  Context    │       │  Options    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txchain::storage::MemoryStore;
//! use txchain::transaction::{MemoryTransactor, TransactOptions, Transactor, DatabaseContextExt};
//!
//! let transactor = MemoryTransactor::new(MemoryStore::new());
//!
//! let oid = transactor.transact(TransactOptions::default(), |db| {
//!     let (oid, _person) = db.insert_new(Person::named("Jane"))?;
//!     Ok(oid)
//! })?;
//! ```

mod context;
mod error;
mod manager;
mod memory;
mod options;
mod transactor;

pub use context::{DatabaseContext, DatabaseContextExt, DbContext};
pub use error::{TransactError, TransactResult};
pub use manager::MemoryTransactor;
pub use memory::{MemoryContext, TransactionMetadata};
pub use options::TransactOptions;
pub use transactor::{try_outcome, Transactor};
