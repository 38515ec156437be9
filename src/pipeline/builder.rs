//! Fluent stacking of pipeline stages.
//!
//! Each call wraps the transactor built so far, so the last stage added is
//! the outermost one:
//!
//! ```ignore
//! let transactor = MemoryTransactor::new(store)
//!     .with_on_delete()
//!     .with_pre_commit(pre_commit)
//!     .with_post_commit(post_commit)
//!     .nested();
//! ```

use crate::pipeline::nested::NestedTransactor;
use crate::pipeline::on_commit::{OnCommit, OnCommitOptions, OnCommitTransactor};
use crate::pipeline::on_delete::{OnDelete, OnDeleteTransactor};
use crate::pipeline::post_commit::{PostCommit, PostCommitOptions, PostCommitTransactor};
use crate::pipeline::pre_commit::{PreCommit, PreCommitOptions, PreCommitTransactor};
use crate::transaction::Transactor;

/// Stage constructors available on every transactor.
pub trait TransactorExt: Transactor + Sized {
    fn with_on_delete(self) -> OnDeleteTransactor<Self> {
        OnDelete::transactor(self)
    }

    fn with_pre_commit(self, options: PreCommitOptions) -> PreCommitTransactor<Self> {
        PreCommit::transactor(self, options)
    }

    fn with_post_commit(self, options: PostCommitOptions) -> PostCommitTransactor<Self> {
        PostCommit::transactor(self, options)
    }

    fn with_on_commit<U: Send + 'static>(self, options: OnCommitOptions<U>) -> OnCommitTransactor<U, Self> {
        OnCommit::transactor(self, options)
    }

    /// Flatten nested calls. Add this stage last.
    fn nested(self) -> NestedTransactor<Self> {
        NestedTransactor::new(self)
    }
}

impl<X: Transactor> TransactorExt for X {}
