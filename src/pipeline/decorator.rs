//! Decorator lifecycle contract.
//!
//! A [`Decorator`] describes what one stage does around a transaction; the
//! generic [`Decorated`] stage drives those hooks for every `Transactor`
//! operation and delegates the transaction itself to the wrapped executor.
//!
//! Per call the hooks run in this order:
//!
//! ```text
//!   enter_transactor_context          (outside the transaction)
//!   ┌── inner executor opens transaction ──────────────────────┐
//!   │ enter_database_context                                   │
//!   │ user callback                                            │
//!   │ leave_database_context(failed)  (may read, write, abort) │
//!   └── inner executor commits ────────────────────────────────┘
//!   leave_transactor_context          (only after a commit)
//! ```

use std::future::Future;

use tracing::{trace, warn};

use crate::transaction::{DbContext, TransactError, TransactOptions, TransactResult, Transactor};

/// One cross-cutting behavior wrapped around a transaction.
pub trait Decorator: Send + Sync {
    /// Private per-call state, created before the transaction opens and
    /// consumed after it commits.
    type State: Send;

    /// Create the state for one call.
    fn enter_transactor_context(&self) -> Self::State;

    /// Derive the context handed to the callback. Identity by default.
    fn enter_database_context(&self, _state: &mut Self::State, db: DbContext) -> DbContext {
        db
    }

    /// Runs right after the callback, still inside the transaction.
    ///
    /// `failed` tells whether the callback returned an error. Returning an
    /// error aborts the transaction.
    fn leave_database_context(
        &self,
        _state: &mut Self::State,
        _db: &DbContext,
        _failed: bool,
    ) -> TransactResult<()> {
        Ok(())
    }

    /// Runs after the transaction committed. Never called on failure.
    fn leave_transactor_context(&self, _state: Self::State) -> TransactResult<()> {
        Ok(())
    }
}

/// A [`Decorator`] stacked on an inner transactor.
pub struct Decorated<D, I> {
    decorator: D,
    inner: I,
}

impl<D: Decorator, I: Transactor> Decorated<D, I> {
    pub fn new(decorator: D, inner: I) -> Self {
        Self { decorator, inner }
    }

    pub fn decorator(&self) -> &D {
        &self.decorator
    }

    /// The transactor this stage delegates to.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Run the leave hook and merge its outcome with the callback's.
    fn leave<T>(
        &self,
        state: &mut D::State,
        db: &DbContext,
        result: TransactResult<T>,
    ) -> TransactResult<T> {
        let failed = result.is_err();
        let left = self.decorator.leave_database_context(state, db, failed);

        match (result, left) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => {
                trace!(tx_id = %db.transaction_id(), error = %e, "leave hook aborted transaction");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(leave_error)) => {
                warn!(
                    tx_id = %db.transaction_id(),
                    error = %leave_error,
                    "leave hook failed after callback failure"
                );
                Err(e)
            }
        }
    }

    fn finish(&self, state: D::State) -> TransactResult<()> {
        self.decorator
            .leave_transactor_context(state)
            .map_err(|e| match e {
                TransactError::AfterCommit(_) => e,
                e => TransactError::AfterCommit(Box::new(e)),
            })
    }
}

impl<D: Decorator, I: Transactor> Transactor for Decorated<D, I> {
    fn transact<T, F>(&self, options: TransactOptions, f: F) -> TransactResult<T>
    where
        F: FnOnce(DbContext) -> TransactResult<T>,
    {
        let mut state = self.decorator.enter_transactor_context();

        let value = self.inner.transact(options, |db| {
            let db = self.decorator.enter_database_context(&mut state, db);
            let result = f(db.clone());
            self.leave(&mut state, &db, result)
        })?;

        self.finish(state)?;
        Ok(value)
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
        async move {
            let mut state = self.decorator.enter_transactor_context();
            let state_ref = &mut state;

            let value = self
                .inner
                .transact_async(options, move |db| async move {
                    let db = self.decorator.enter_database_context(state_ref, db);
                    let result = f(db.clone()).await;
                    self.leave(state_ref, &db, result)
                })
                .await?;

            self.finish(state)?;
            Ok(value)
        }
    }

    fn try_transact<F>(&self, options: TransactOptions, f: F) -> TransactResult<bool>
    where
        F: FnOnce(DbContext) -> TransactResult<()>,
    {
        let mut state = self.decorator.enter_transactor_context();

        let committed = self.inner.try_transact(options, |db| {
            let db = self.decorator.enter_database_context(&mut state, db);
            let result = f(db.clone());
            self.leave(&mut state, &db, result)
        })?;

        if committed {
            self.finish(state)?;
        }
        Ok(committed)
    }
}

impl<D: std::fmt::Debug, I: std::fmt::Debug> std::fmt::Debug for Decorated<D, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decorated")
            .field("decorator", &self.decorator)
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::storage::{MemoryStore, Oid};
    use crate::testing::{memory, Person};
    use crate::transaction::{DatabaseContextExt, MemoryTransactor};

    /// Records every hook invocation.
    #[derive(Debug, Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail_leave: bool,
        fail_left: bool,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl Decorator for Recorder {
        type State = u32;

        fn enter_transactor_context(&self) -> u32 {
            self.log.lock().push("enter".into());
            7
        }

        fn enter_database_context(&self, state: &mut u32, db: DbContext) -> DbContext {
            *state += 1;
            self.log.lock().push(format!("enter_db {}", state));
            db
        }

        fn leave_database_context(
            &self,
            state: &mut u32,
            db: &DbContext,
            failed: bool,
        ) -> TransactResult<()> {
            let open = db.changes().is_ok();
            self.log.lock().push(format!("leave_db {} failed={} open={}", state, failed, open));
            if self.fail_leave {
                return Err(TransactError::message("leave failed"));
            }
            Ok(())
        }

        fn leave_transactor_context(&self, state: u32) -> TransactResult<()> {
            self.log.lock().push(format!("left {}", state));
            if self.fail_left {
                return Err(TransactError::message("left failed"));
            }
            Ok(())
        }
    }

    fn setup(recorder: Recorder) -> Decorated<Recorder, MemoryTransactor> {
        Decorated::new(recorder, memory())
    }

    #[test]
    fn test_hook_order_on_success() {
        let stage = setup(Recorder::default());

        let value = stage.transact(TransactOptions::default(), |_| Ok(42)).unwrap();

        assert_eq!(value, 42);
        assert_eq!(
            stage.decorator().events(),
            vec!["enter", "enter_db 8", "leave_db 8 failed=false open=true", "left 8"]
        );
    }

    #[test]
    fn test_left_skipped_on_failure() {
        let stage = setup(Recorder::default());

        let result: TransactResult<()> =
            stage.transact(TransactOptions::default(), |_| Err(TransactError::message("boom")));

        assert!(matches!(result, Err(TransactError::Callback(_))));
        assert_eq!(
            stage.decorator().events(),
            vec!["enter", "enter_db 8", "leave_db 8 failed=true open=true"]
        );
    }

    #[test]
    fn test_leave_error_aborts_commit() {
        let stage = setup(Recorder {
            fail_leave: true,
            ..Default::default()
        });

        let result = stage.transact(TransactOptions::default(), |db| {
            db.insert_new(Person::named("Per")).map(|(oid, _)| oid)
        });

        let e = result.unwrap_err();
        assert_eq!(e.to_string(), "transaction callback failed: leave failed");
        assert_eq!(stage.inner().store().stats().objects, 0);
        assert!(!stage.decorator().events().iter().any(|e| e.starts_with("left")));
    }

    #[test]
    fn test_callback_error_wins_over_leave_error() {
        let stage = setup(Recorder {
            fail_leave: true,
            ..Default::default()
        });

        let result: TransactResult<()> =
            stage.transact(TransactOptions::default(), |_| Err(TransactError::message("boom")));

        assert_eq!(
            result.unwrap_err().to_string(),
            "transaction callback failed: boom"
        );
    }

    #[test]
    fn test_left_error_reported_after_commit() {
        let stage = setup(Recorder {
            fail_left: true,
            ..Default::default()
        });

        let result = stage.transact(TransactOptions::default(), |db| {
            db.insert_new(Person::named("Per")).map(|(oid, _)| oid)
        });

        let e = result.unwrap_err();
        assert!(e.is_committed());
        assert!(stage.inner().store().get(Oid(1)).is_some());
    }

    #[test]
    fn test_try_transact() {
        let stage = setup(Recorder::default());

        assert!(stage.try_transact(TransactOptions::default(), |_| Ok(())).unwrap());
        assert!(!stage
            .try_transact(TransactOptions::default(), |_| Err(TransactError::message("boom")))
            .unwrap());

        let left = stage
            .decorator()
            .events()
            .into_iter()
            .filter(|e| e.starts_with("left"))
            .count();
        assert_eq!(left, 1);
    }

    #[test]
    fn test_stages_stack() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = Decorated::new(
            Recorder {
                log: log.clone(),
                ..Default::default()
            },
            MemoryTransactor::new(MemoryStore::new()),
        );
        let outer = Decorated::new(
            Recorder {
                log: log.clone(),
                ..Default::default()
            },
            inner,
        );

        outer.transact(TransactOptions::default(), |_| Ok(())).unwrap();

        // The outer stage's callback wrapper runs innermost.
        assert_eq!(
            log.lock().clone(),
            vec![
                "enter",
                "enter",
                "enter_db 8",
                "enter_db 8",
                "leave_db 8 failed=false open=true",
                "leave_db 8 failed=false open=true",
                "left 8",
                "left 8",
            ]
        );
    }

    #[tokio::test]
    async fn test_transact_async() {
        let stage = setup(Recorder::default());

        let oid = stage
            .transact_async(TransactOptions::default(), |db| async move {
                tokio::task::yield_now().await;
                db.insert_new(Person::named("Per")).map(|(oid, _)| oid)
            })
            .await
            .unwrap();

        assert!(stage.inner().store().get(oid).is_some());
        assert_eq!(stage.decorator().events().last().unwrap(), "left 8");
    }

    #[tokio::test]
    async fn test_transact_async_failure() {
        let stage = setup(Recorder::default());

        let result: TransactResult<()> = stage
            .transact_async(TransactOptions::default(), |_| async move {
                tokio::task::yield_now().await;
                Err(TransactError::message("boom"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(
            stage.decorator().events().last().unwrap(),
            "leave_db 8 failed=true open=true"
        );
    }
}
