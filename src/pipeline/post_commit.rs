//! Post-commit hooks.
//!
//! The changes a transaction made are matched against the registry while
//! the transaction is still open, and the matched hooks run once it has
//! committed. Hooks only get the [`Change`]; the transaction is gone by the
//! time they run.
//!
//! Hooks either run inline, before `transact` returns, or are handed to a
//! [`HookScheduler`] as one job per transaction:
//!
//! ```text
//!   callback ─► leave_database_context ─► commit ─► leave_transactor_context
//!                 (capture pairs)                      │
//!                                     ┌────────────────┴──────────────┐
//!                                     ▼                               ▼
//!                              Dispatch::Inline              Dispatch::Scheduled
//!                          (errors -> AfterCommit)    (errors and panics logged, one job)
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, error, trace};

use crate::pipeline::decorator::{Decorated, Decorator};
use crate::pipeline::hooks::{select_hooks, HookRegistry};
use crate::storage::{Change, Entity};
use crate::transaction::{DbContext, TransactResult, Transactor};

/// A hook run for one inserted or updated object after commit.
pub type PostCommitHook = Arc<dyn Fn(&Change) -> TransactResult<()> + Send + Sync>;

/// A unit of work handed to a [`HookScheduler`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs post-commit jobs outside the committing call.
pub trait HookScheduler: Send + Sync {
    fn schedule(&self, job: Job);
}

/// Schedules jobs on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    ///
    /// Returns `None` outside a tokio runtime.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl HookScheduler for TokioScheduler {
    fn schedule(&self, job: Job) {
        // The join handle is dropped; the job logs its own errors and panics.
        let _ = self.handle.spawn_blocking(job);
    }
}

/// How captured hooks are run after commit.
#[derive(Clone, Default)]
pub enum Dispatch {
    /// Run before `transact` returns, in commit order.
    #[default]
    Inline,
    /// Hand one job per transaction to a scheduler.
    Scheduled(Arc<dyn HookScheduler>),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Inline => write!(f, "Inline"),
            Dispatch::Scheduled(_) => write!(f, "Scheduled"),
        }
    }
}

/// Post-commit hooks, keyed by declared type, and how to run them.
#[derive(Debug, Clone, Default)]
pub struct PostCommitOptions {
    hooks: HookRegistry<PostCommitHook>,
    dispatch: Dispatch,
}

impl PostCommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for objects declared as `T`.
    pub fn hook<T: Entity>(
        &mut self,
        hook: impl Fn(&Change) -> TransactResult<()> + Send + Sync + 'static,
    ) -> TransactResult<&mut Self> {
        self.hooks.register::<T>(Arc::new(hook))?;
        Ok(self)
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn hooks(&self) -> &HookRegistry<PostCommitHook> {
        &self.hooks
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }
}

/// Decorator running [`PostCommitOptions`] hooks after commit.
#[derive(Debug, Clone)]
pub struct PostCommit {
    options: Arc<PostCommitOptions>,
}

/// Transactor with post-commit hooks.
pub type PostCommitTransactor<I> = Decorated<PostCommit, I>;

impl PostCommit {
    pub fn new(options: PostCommitOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    pub fn transactor<I: Transactor>(inner: I, options: PostCommitOptions) -> PostCommitTransactor<I> {
        Decorated::new(Self::new(options), inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Run captured hooks in order, stopping at the first failure.
fn run_hooks(hooks: &[(Change, PostCommitHook)]) -> TransactResult<()> {
    for (change, hook) in hooks {
        trace!(%change, "running post-commit hook");
        hook(change)?;
    }
    Ok(())
}

impl Decorator for PostCommit {
    type State = Vec<(Change, PostCommitHook)>;

    fn enter_transactor_context(&self) -> Self::State {
        Vec::new()
    }

    fn leave_database_context(
        &self,
        state: &mut Self::State,
        db: &DbContext,
        failed: bool,
    ) -> TransactResult<()> {
        if failed {
            return Ok(());
        }
        *state = select_hooks(db.as_ref(), self.options.hooks())?;
        Ok(())
    }

    fn leave_transactor_context(&self, state: Self::State) -> TransactResult<()> {
        if state.is_empty() {
            return Ok(());
        }

        match &self.options.dispatch {
            Dispatch::Inline => run_hooks(&state),
            Dispatch::Scheduled(scheduler) => {
                debug!(hooks = state.len(), "scheduling post-commit hooks");
                scheduler.schedule(Box::new(move || {
                    match panic::catch_unwind(AssertUnwindSafe(|| run_hooks(&state))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(error = %e, "post-commit hook failed"),
                        Err(payload) => {
                            error!(panic = panic_message(&*payload), "post-commit hook panicked")
                        }
                    }
                }));
                Ok(())
            }
        }
    }
}
