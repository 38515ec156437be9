//! Pre-commit hooks.
//!
//! Hooks run inside the transaction, after the callback succeeded and
//! before the executor commits. A hook may read and write through the
//! context it receives; an error from a hook aborts the transaction.

use std::sync::Arc;

use tracing::trace;

use crate::pipeline::decorator::{Decorated, Decorator};
use crate::pipeline::hooks::{select_hooks, HookRegistry};
use crate::storage::{Change, Entity};
use crate::transaction::{DatabaseContext, DbContext, TransactResult, Transactor};

/// A hook run for one inserted or updated object before commit.
pub type PreCommitHook = Arc<dyn Fn(&dyn DatabaseContext, &Change) -> TransactResult<()> + Send + Sync>;

/// Pre-commit hooks, keyed by declared type.
#[derive(Debug, Clone, Default)]
pub struct PreCommitOptions {
    hooks: HookRegistry<PreCommitHook>,
}

impl PreCommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for objects declared as `T`.
    pub fn hook<T: Entity>(
        &mut self,
        hook: impl Fn(&dyn DatabaseContext, &Change) -> TransactResult<()> + Send + Sync + 'static,
    ) -> TransactResult<&mut Self> {
        self.hooks.register::<T>(Arc::new(hook))?;
        Ok(self)
    }

    pub fn hooks(&self) -> &HookRegistry<PreCommitHook> {
        &self.hooks
    }
}

/// Decorator running [`PreCommitOptions`] hooks.
#[derive(Debug, Clone)]
pub struct PreCommit {
    options: Arc<PreCommitOptions>,
}

/// Transactor with pre-commit hooks.
pub type PreCommitTransactor<I> = Decorated<PreCommit, I>;

impl PreCommit {
    pub fn new(options: PreCommitOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    pub fn transactor<I: Transactor>(inner: I, options: PreCommitOptions) -> PreCommitTransactor<I> {
        Decorated::new(Self::new(options), inner)
    }
}

impl Decorator for PreCommit {
    type State = ();

    fn enter_transactor_context(&self) {}

    fn leave_database_context(&self, _state: &mut (), db: &DbContext, failed: bool) -> TransactResult<()> {
        if failed {
            return Ok(());
        }

        for (change, hook) in select_hooks(db.as_ref(), self.options.hooks())? {
            trace!(tx_id = %db.transaction_id(), %change, "running pre-commit hook");
            hook(db.as_ref(), &change)?;
        }
        Ok(())
    }
}
