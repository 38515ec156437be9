//! txchain - composable transaction middleware
//!
//! This crate wraps a unit-of-work executor (a [`Transactor`]) in a chain of
//! stages. Each stage adds one behavior around every transaction: delete
//! notification, pre-commit hooks, post-commit hooks, or flattening of
//! nested transactions into the enclosing one.
//!
//! # Example
//!
//! ```ignore
//! use txchain::pipeline::{PostCommitOptions, TransactorExt};
//! use txchain::storage::MemoryStore;
//! use txchain::transaction::{DatabaseContextExt, MemoryTransactor, TransactOptions, Transactor};
//!
//! let mut post_commit = PostCommitOptions::new();
//! post_commit.hook::<Person>(|change| {
//!     println!("{}", change);
//!     Ok(())
//! })?;
//!
//! let transactor = MemoryTransactor::new(MemoryStore::new())
//!     .with_on_delete()
//!     .with_post_commit(post_commit)
//!     .nested();
//!
//! let oid = transactor.transact(TransactOptions::default(), |db| {
//!     let (oid, _) = db.insert_new(Person::named("Per"))?;
//!     Ok(oid)
//! })?;
//! ```

pub mod pipeline;
pub mod storage;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use pipeline::TransactorExt;
pub use transaction::{DatabaseContext, DbContext, TransactError, TransactOptions, TransactResult, Transactor};
