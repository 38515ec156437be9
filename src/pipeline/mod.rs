//! Transaction middleware stages.
//!
//! Every stage implements [`Transactor`](crate::transaction::Transactor) and
//! wraps another one, so stages stack in any order around an executor. Most
//! stages are a [`Decorator`] driven by the generic [`Decorated`] stage; the
//! nesting stage is its own transactor.
//!
//! # Architecture
//!
//! ```text
//!   caller
//!     │ transact(options, f)
//!     ▼
//! ┌──────────────────┐
//! │ NestedTransactor │  nested calls stop here and join the open transaction
//! └──────────────────┘
//!     ▼
//! ┌──────────────────┐
//! │ PostCommit       │  capture matched changes, dispatch after commit
//! └──────────────────┘
//!     ▼
//! ┌──────────────────┐
//! │ PreCommit        │  run hooks before commit
//! └──────────────────┘
//!     ▼
//! ┌──────────────────┐
//! │ OnDelete         │  notify DeleteAware objects
//! └──────────────────┘
//!     ▼
//! ┌──────────────────┐
//! │ MemoryTransactor │  opens, commits, rolls back
//! └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txchain::pipeline::{PreCommitOptions, TransactorExt};
//! use txchain::transaction::{MemoryTransactor, TransactOptions, Transactor};
//!
//! let mut pre_commit = PreCommitOptions::new();
//! pre_commit.hook::<Person>(|_db, change| {
//!     println!("{}", change);
//!     Ok(())
//! })?;
//!
//! let transactor = MemoryTransactor::new(store)
//!     .with_on_delete()
//!     .with_pre_commit(pre_commit)
//!     .nested();
//!
//! transactor.transact(TransactOptions::default(), |db| { ... })?;
//! ```

mod builder;
mod decorator;
mod hooks;
mod nested;
mod on_commit;
mod on_delete;
mod post_commit;
mod pre_commit;

pub use builder::TransactorExt;
pub use decorator::{Decorated, Decorator};
pub use hooks::{select_hooks, HookRegistry};
pub use nested::{NestedTransactionContext, NestedTransactor};
pub use on_commit::{OnCommit, OnCommitOptions, OnCommitTransactor};
pub use on_delete::{OnDelete, OnDeleteContext, OnDeleteTransactor};
pub use post_commit::{
    Dispatch, HookScheduler, Job, PostCommit, PostCommitHook, PostCommitOptions,
    PostCommitTransactor, TokioScheduler,
};
pub use pre_commit::{PreCommit, PreCommitHook, PreCommitOptions, PreCommitTransactor};
