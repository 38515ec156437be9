//! Generic before/after commit stage.
//!
//! `on_before_commit` runs inside the transaction once the callback
//! succeeded and produces a value; `on_after_commit` receives that value
//! after the commit.

use std::sync::Arc;

use crate::pipeline::decorator::{Decorated, Decorator};
use crate::transaction::{DbContext, TransactResult, Transactor};

type BeforeCommit<U> = Arc<dyn Fn(&DbContext) -> TransactResult<U> + Send + Sync>;
type AfterCommit<U> = Arc<dyn Fn(U) -> TransactResult<()> + Send + Sync>;

/// The pair of callbacks run by [`OnCommit`].
pub struct OnCommitOptions<U> {
    before: BeforeCommit<U>,
    after: AfterCommit<U>,
}

impl<U: Default + Send + 'static> OnCommitOptions<U> {
    /// Callbacks that produce `U::default()` and do nothing after commit.
    pub fn new() -> Self {
        Self {
            before: Arc::new(|_: &DbContext| Ok(U::default())),
            after: Arc::new(|_: U| Ok(())),
        }
    }
}

impl<U: Send + 'static> OnCommitOptions<U> {
    pub fn on_before_commit(
        mut self,
        f: impl Fn(&DbContext) -> TransactResult<U> + Send + Sync + 'static,
    ) -> Self {
        self.before = Arc::new(f);
        self
    }

    pub fn on_after_commit(mut self, f: impl Fn(U) -> TransactResult<()> + Send + Sync + 'static) -> Self {
        self.after = Arc::new(f);
        self
    }
}

impl<U: Default + Send + 'static> Default for OnCommitOptions<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> Clone for OnCommitOptions<U> {
    fn clone(&self) -> Self {
        Self {
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<U> std::fmt::Debug for OnCommitOptions<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnCommitOptions")
            .field("value", &std::any::type_name::<U>())
            .finish()
    }
}

/// Decorator running an [`OnCommitOptions`] pair.
#[derive(Debug, Clone)]
pub struct OnCommit<U> {
    options: OnCommitOptions<U>,
}

/// Transactor with before/after commit callbacks.
pub type OnCommitTransactor<U, I> = Decorated<OnCommit<U>, I>;

impl<U: Send + 'static> OnCommit<U> {
    pub fn new(options: OnCommitOptions<U>) -> Self {
        Self { options }
    }

    pub fn transactor<I: Transactor>(inner: I, options: OnCommitOptions<U>) -> OnCommitTransactor<U, I> {
        Decorated::new(Self::new(options), inner)
    }
}

impl<U: Send + 'static> Decorator for OnCommit<U> {
    type State = Option<U>;

    fn enter_transactor_context(&self) -> Option<U> {
        None
    }

    fn leave_database_context(&self, state: &mut Option<U>, db: &DbContext, failed: bool) -> TransactResult<()> {
        if !failed {
            *state = Some((self.options.before)(db)?);
        }
        Ok(())
    }

    fn leave_transactor_context(&self, state: Option<U>) -> TransactResult<()> {
        match state {
            Some(value) => (self.options.after)(value),
            None => Ok(()),
        }
    }
}
