//! The unit-of-work execution contract.
//!
//! Executors and pipeline stages all implement [`Transactor`], so stages can
//! wrap executors or other stages in any order.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::transaction::context::DbContext;
use crate::transaction::error::TransactResult;
use crate::transaction::options::TransactOptions;

/// Runs callbacks inside atomic transactions.
///
/// A callback that returns `Ok` commits its transaction; one that returns
/// `Err` rolls it back and the error is returned to the caller unchanged.
pub trait Transactor: Send + Sync {
    /// Run `f` in a transaction and return its value.
    fn transact<T, F>(&self, options: TransactOptions, f: F) -> TransactResult<T>
    where
        F: FnOnce(DbContext) -> TransactResult<T>;

    /// Run an asynchronous callback in a transaction.
    ///
    /// The callback may suspend; the transaction stays open until the
    /// returned future completes.
    fn transact_async<T, F, Fut>(
        &self,
        options: TransactOptions,
        f: F,
    ) -> impl Future<Output = TransactResult<T>> + Send
    where
        T: Send,
        F: FnOnce(DbContext) -> Fut + Send,
        Fut: Future<Output = TransactResult<T>> + Send;

    /// Run `f` in a transaction, reporting whether it committed.
    ///
    /// Failures become `Ok(false)`, except a nested abort and a failure after
    /// commit, which are returned as errors.
    fn try_transact<F>(&self, options: TransactOptions, f: F) -> TransactResult<bool>
    where
        F: FnOnce(DbContext) -> TransactResult<()>;
}

impl<X: Transactor> Transactor for Arc<X> {
    fn transact<T, F>(&self, options: TransactOptions, f: F) -> TransactResult<T>
    where
        F: FnOnce(DbContext) -> TransactResult<T>,
    {
        (**self).transact(options, f)
    }

    fn transact_async<T, F, Fut>(
        &self,
        options: TransactOptions,
        f: F,
    ) -> impl Future<Output = TransactResult<T>> + Send
    where
        T: Send,
        F: FnOnce(DbContext) -> Fut + Send,
        Fut: Future<Output = TransactResult<T>> + Send,
    {
        (**self).transact_async(options, f)
    }

    fn try_transact<F>(&self, options: TransactOptions, f: F) -> TransactResult<bool>
    where
        F: FnOnce(DbContext) -> TransactResult<()>,
    {
        (**self).try_transact(options, f)
    }
}

/// Map the outcome of a transaction to the `try_transact` convention.
pub fn try_outcome(result: TransactResult<()>) -> TransactResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_nested_abort() || e.is_committed() => Err(e),
        Err(e) => {
            debug!(error = %e, "try_transact: transaction did not commit");
            Ok(false)
        }
    }
}
