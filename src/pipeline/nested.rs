//! Nested transactions.
//!
//! A `transact` call made while another call of the same
//! [`NestedTransactor`] is running a writable transaction on the same flow
//! does not open a transaction of its own. Its callback runs directly inside
//! the enclosing transaction, with a context that reports
//! [`is_nested`](crate::transaction::DatabaseContext::is_nested).
//!
//! # Failure
//!
//! When a nested callback fails, the failure is recorded in the flow's
//! scope, the enclosing transaction is rolled back and the error is returned
//! to the nested caller. If the outermost callback then returns `Ok` anyway,
//! the call fails with [`TransactError::NestedTransactionAborted`], so
//! swallowing a nested error can never commit half a unit of work.
//!
//! # Read-only transactions
//!
//! A call made under a read-only transaction is not nested: it runs as an
//! independent transaction. Once it succeeds, the read-only transaction is
//! restarted so it observes what the independent call committed.
//!
//! ```text
//!   Idle ──transact──► Active(outer) ──transact──► runs in Active(outer)
//!                          │                              │ Err
//!                          │ Ok                           ▼
//!                          ▼                          Aborted ──► NestedTransactionAborted
//!                        Idle
//! ```
//!
//! Stack this stage outermost: nested calls skip every stage below it, so
//! hooks of those stages fire once for the whole unit of work.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::storage::{Change, Entity, EntityType, Oid};
use crate::transaction::{DatabaseContext, DbContext, TransactError, TransactOptions, TransactResult, Transactor};

tokio::task_local! {
    static CURRENT: Arc<NestingScope>;
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Nesting state of one logical flow.
struct NestingScope {
    /// Id of the [`NestedTransactor`] that opened the scope.
    owner: u64,
    db: DbContext,
    read_only: bool,
    /// First failure raised by a nested callback.
    failure: Mutex<Option<TransactError>>,
}

impl NestingScope {
    fn new(owner: u64, db: DbContext) -> Arc<Self> {
        Arc::new(Self {
            owner,
            read_only: db.is_read_only(),
            db,
            failure: Mutex::new(None),
        })
    }

    fn capture(&self, e: &TransactError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(e.clone());
        }
    }

    fn take_failure(&self) -> Option<TransactError> {
        self.failure.lock().take()
    }
}

enum Mode {
    /// Run in a transaction of the inner executor. `parent` is the read-only
    /// scope the call was made from, if any.
    TopLevel { parent: Option<Arc<NestingScope>> },
    /// Run inside the writable transaction of this scope.
    Nested(Arc<NestingScope>),
}

/// Transactor that flattens nested calls into the enclosing transaction.
pub struct NestedTransactor<I> {
    id: u64,
    inner: I,
}

impl<I: Transactor> NestedTransactor<I> {
    pub fn new(inner: I) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner,
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    fn mode(&self) -> Mode {
        let current = CURRENT
            .try_with(|scope| scope.clone())
            .ok()
            .filter(|scope| scope.owner == self.id);

        match current {
            Some(scope) if !scope.read_only => Mode::Nested(scope),
            parent => Mode::TopLevel { parent },
        }
    }

    fn nested_context(scope: &NestingScope) -> DbContext {
        trace!(tx_id = %scope.db.transaction_id(), "joining enclosing transaction");
        Arc::new(NestedTransactionContext {
            inner: scope.db.clone(),
        })
    }

    /// Record a nested failure and roll back the enclosing transaction.
    fn abort(scope: &NestingScope, e: TransactError) -> TransactError {
        debug!(tx_id = %scope.db.transaction_id(), error = %e, "nested call failed");
        scope.capture(&e);
        if let Err(rollback_error) = scope.db.rollback() {
            warn!(
                tx_id = %scope.db.transaction_id(),
                error = %rollback_error,
                "rollback after nested failure failed"
            );
        }
        e
    }

    /// Outcome of a top-level callback, given what nested calls recorded.
    fn close<T>(scope: &NestingScope, result: TransactResult<T>) -> TransactResult<T> {
        let failure = scope.take_failure();
        match (result, failure) {
            (Ok(_), Some(cause)) => Err(TransactError::nested_aborted(cause)),
            (Err(e), Some(cause)) => {
                if e.to_string() != cause.to_string() {
                    warn!(
                        tx_id = %scope.db.transaction_id(),
                        error = %e,
                        nested = %cause,
                        "nested failure superseded by the outer error"
                    );
                }
                Err(e)
            }
            (result, None) => result,
        }
    }

    fn restart_parent(parent: Option<&NestingScope>) -> TransactResult<()> {
        if let Some(parent) = parent {
            trace!(tx_id = %parent.db.transaction_id(), "restarting read-only transaction");
            parent.db.restart()?;
        }
        Ok(())
    }
}

impl<I: Transactor> Transactor for NestedTransactor<I> {
    fn transact<T, F>(&self, options: TransactOptions, f: F) -> TransactResult<T>
    where
        F: FnOnce(DbContext) -> TransactResult<T>,
    {
        match self.mode() {
            Mode::Nested(scope) => f(Self::nested_context(&scope)).map_err(|e| Self::abort(&scope, e)),
            Mode::TopLevel { parent } => {
                let value = self.inner.transact(options, |db| {
                    let scope = NestingScope::new(self.id, db.clone());
                    let result = CURRENT.sync_scope(scope.clone(), || f(db));
                    Self::close(&scope, result)
                })?;

                Self::restart_parent(parent.as_deref())?;
                Ok(value)
            }
        }
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
            match self.mode() {
                Mode::Nested(scope) => {
                    let db = Self::nested_context(&scope);
                    f(db).await.map_err(|e| Self::abort(&scope, e))
                }
                Mode::TopLevel { parent } => {
                    let value = self
                        .inner
                        .transact_async(options, move |db| async move {
                            let scope = NestingScope::new(self.id, db.clone());
                            let result = CURRENT.scope(scope.clone(), f(db)).await;
                            Self::close(&scope, result)
                        })
                        .await?;

                    Self::restart_parent(parent.as_deref())?;
                    Ok(value)
                }
            }
        }
    }

    fn try_transact<F>(&self, options: TransactOptions, f: F) -> TransactResult<bool>
    where
        F: FnOnce(DbContext) -> TransactResult<()>,
    {
        match self.mode() {
            Mode::Nested(scope) => {
                f(Self::nested_context(&scope)).map_err(|e| Self::abort(&scope, e))?;
                Ok(true)
            }
            Mode::TopLevel { parent } => {
                let committed = self.inner.try_transact(options, |db| {
                    let scope = NestingScope::new(self.id, db.clone());
                    let result = CURRENT.sync_scope(scope.clone(), || f(db));
                    Self::close(&scope, result)
                })?;

                if committed {
                    Self::restart_parent(parent.as_deref())?;
                }
                Ok(committed)
            }
        }
    }
}

impl<I: std::fmt::Debug> std::fmt::Debug for NestedTransactor<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedTransactor")
            .field("id", &self.id)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Context handed to nested callbacks.
///
/// Every operation goes to the enclosing transaction.
pub struct NestedTransactionContext {
    inner: DbContext,
}

impl DatabaseContext for NestedTransactionContext {
    fn transaction_id(&self) -> &str {
        self.inner.transaction_id()
    }

    fn insert(&self, entity: Arc<dyn Entity>) -> TransactResult<Oid> {
        self.inner.insert(entity)
    }

    fn get(&self, oid: Oid) -> TransactResult<Arc<dyn Entity>> {
        self.inner.get(oid)
    }

    fn oid_of(&self, entity: &Arc<dyn Entity>) -> TransactResult<Oid> {
        self.inner.oid_of(entity)
    }

    fn update(&self, oid: Oid, entity: Arc<dyn Entity>) -> TransactResult<()> {
        self.inner.update(oid, entity)
    }

    fn delete(&self, oid: Oid) -> TransactResult<()> {
        self.inner.delete(oid)
    }

    fn changes(&self) -> TransactResult<Vec<Change>> {
        self.inner.changes()
    }

    fn declared_type(&self, oid: Oid) -> TransactResult<Option<EntityType>> {
        self.inner.declared_type(oid)
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn rollback(&self) -> TransactResult<()> {
        self.inner.rollback()
    }

    fn restart(&self) -> TransactResult<()> {
        self.inner.restart()
    }

    fn is_nested(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Barrier;

    use super::*;
    use crate::storage::StorageError;
    use crate::testing::{capture_warnings, memory, Person};
    use crate::transaction::{DatabaseContextExt, MemoryTransactor};

    fn setup() -> NestedTransactor<MemoryTransactor> {
        NestedTransactor::new(memory())
    }

    #[test]
    fn test_top_level_is_not_nested() {
        let nested = setup();
        let is_nested = nested
            .transact(TransactOptions::default(), |db| Ok(db.is_nested()))
            .unwrap();
        assert!(!is_nested);
    }

    #[test]
    fn test_nested_call_joins_outer_transaction() {
        let nested = setup();

        let oid = nested
            .transact(TransactOptions::default(), |db| {
                let (oid, _) = db.insert_new(Person::named("Per"))?;

                nested.transact(TransactOptions::default(), |inner| {
                    assert!(inner.is_nested());
                    assert_eq!(inner.transaction_id(), db.transaction_id());
                    // Uncommitted writes of the outer call are visible.
                    assert_eq!(inner.get_as::<Person>(oid)?.name(), "Per");
                    inner.insert_new(Person::named("Anna")).map(|_| ())
                })?;

                assert_eq!(db.changes()?.len(), 2);
                Ok(oid)
            })
            .unwrap();

        let store = nested.inner().store();
        assert!(store.get(oid).is_some());
        assert_eq!(store.stats().objects, 2);
        assert_eq!(nested.inner().active_count(), 0);
    }

    #[test]
    fn test_deeply_nested_calls() {
        let nested = setup();

        nested
            .transact(TransactOptions::default(), |db| {
                nested.transact(TransactOptions::default(), |one| {
                    nested.transact(TransactOptions::default(), |two| {
                        assert!(one.is_nested() && two.is_nested());
                        assert_eq!(two.transaction_id(), db.transaction_id());
                        two.insert_new(Person::named("Per")).map(|_| ())
                    })
                })
            })
            .unwrap();

        assert_eq!(nested.inner().store().stats().objects, 1);
    }

    #[test]
    fn test_nested_failure_detaches_outer() {
        let nested = setup();

        let result = nested.transact(TransactOptions::default(), |db| {
            let (oid, _) = db.insert_new(Person::named("Per"))?;

            let inner: TransactResult<()> =
                nested.transact(TransactOptions::default(), |_| Err(TransactError::message("boom")));
            assert!(matches!(inner, Err(TransactError::Callback(_))));

            // The enclosing transaction is gone.
            assert!(matches!(db.get(oid), Err(TransactError::NoTransaction)));
            Ok(())
        });

        let e = result.unwrap_err();
        assert!(e.is_nested_abort());
        assert_eq!(e.root_cause().to_string(), "transaction callback failed: boom");
        assert_eq!(nested.inner().store().stats().objects, 0);
        assert_eq!(nested.inner().active_count(), 0);
    }

    #[test]
    fn test_rethrown_nested_failure_keeps_original_error() {
        let nested = setup();

        let (result, logs) = capture_warnings(|| {
            nested.transact(TransactOptions::default(), |_| {
                nested.transact(TransactOptions::default(), |_| {
                    Err::<(), _>(TransactError::message("boom"))
                })
            })
        });

        assert!(matches!(result, Err(TransactError::Callback(_))));
        assert!(!logs.contains("superseded"));
    }

    #[test]
    fn test_outer_error_after_nested_failure_logs_nested_cause() {
        let nested = setup();

        let (result, logs) = capture_warnings(|| {
            nested.transact(TransactOptions::default(), |_| {
                let _ = nested.transact(TransactOptions::default(), |_| {
                    Err::<(), _>(TransactError::message("inner"))
                });
                Err::<(), _>(TransactError::message("outer"))
            })
        });

        assert_eq!(result.unwrap_err().to_string(), "transaction callback failed: outer");
        assert!(logs.contains("superseded"));
        assert!(logs.contains("transaction callback failed: inner"));
    }

    #[test]
    fn test_first_nested_failure_wins() {
        let nested = setup();

        let result = nested.transact(TransactOptions::default(), |_| {
            let _ = nested.transact(TransactOptions::default(), |_| {
                Err::<(), _>(TransactError::message("first"))
            });
            let _ = nested.transact(TransactOptions::default(), |_| {
                Err::<(), _>(TransactError::message("second"))
            });
            Ok(())
        });

        let e = result.unwrap_err();
        assert_eq!(e.root_cause().to_string(), "transaction callback failed: first");
    }

    #[test]
    fn test_try_transact_nested() {
        let nested = setup();

        let result = nested.try_transact(TransactOptions::default(), |_| {
            assert!(nested
                .try_transact(TransactOptions::default(), |db| {
                    db.insert_new(Person::named("Per")).map(|_| ())
                })
                .unwrap());

            // A nested failure is an error, never `false`.
            let failed = nested.try_transact(TransactOptions::default(), |_| {
                Err(TransactError::message("boom"))
            });
            assert!(failed.is_err());
            Ok(())
        });

        // Nor is the abort it causes in the outer call.
        assert!(result.unwrap_err().is_nested_abort());
        assert_eq!(nested.inner().store().stats().objects, 0);
    }

    #[test]
    fn test_try_transact_top_level() {
        let nested = setup();
        assert!(nested.try_transact(TransactOptions::default(), |_| Ok(())).unwrap());
        assert!(!nested
            .try_transact(TransactOptions::default(), |_| Err(TransactError::message("boom")))
            .unwrap());
    }

    #[test]
    fn test_read_only_outer_restarts_after_nested_writes() {
        let nested = setup();

        nested
            .transact(TransactOptions::read_only(), |db| {
                let oid = nested.transact(TransactOptions::default(), |inner| {
                    assert!(!inner.is_nested());
                    assert_ne!(inner.transaction_id(), db.transaction_id());
                    inner.insert_new(Person::named("Per")).map(|(oid, _)| oid)
                })?;
                assert_eq!(db.get_as::<Person>(oid)?.name(), "Per");

                nested.transact(TransactOptions::default(), |inner| {
                    inner.update(oid, Arc::new(Person::named("Per Samuelsson")))
                })?;
                assert_eq!(db.get_as::<Person>(oid)?.name(), "Per Samuelsson");

                nested.transact(TransactOptions::default(), |inner| inner.delete(oid))?;
                assert!(matches!(
                    db.get(oid),
                    Err(TransactError::Storage(StorageError::ObjectNotFound(_)))
                ));
                Ok(())
            })
            .unwrap();

        assert_eq!(nested.inner().store().stats().objects, 0);
    }

    #[test]
    fn test_read_only_outer_survives_failed_independent_call() {
        let nested = setup();

        nested
            .transact(TransactOptions::read_only(), |db| {
                let inner: TransactResult<()> = nested
                    .transact(TransactOptions::default(), |_| Err(TransactError::message("boom")));
                assert!(inner.is_err());
                assert!(db.changes().is_ok());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_read_only_call_under_writable_is_nested() {
        let nested = setup();

        nested
            .transact(TransactOptions::default(), |db| {
                let (oid, _) = db.insert_new(Person::named("Per"))?;
                nested.transact(TransactOptions::read_only(), |inner| {
                    assert!(inner.is_nested());
                    inner.get(oid).map(|_| ())
                })
            })
            .unwrap();
    }

    #[test]
    fn test_other_instance_does_not_nest() {
        let store = crate::storage::MemoryStore::new();
        let executor = MemoryTransactor::new(store);
        let first = NestedTransactor::new(executor.clone());
        let second = NestedTransactor::new(executor);

        let result = first.transact(TransactOptions::default(), |_| {
            second.transact(TransactOptions::default(), |_| Ok(()))
        });

        assert!(matches!(result, Err(TransactError::AlreadyExecuting)));
    }

    #[tokio::test]
    async fn test_nesting_follows_await() {
        let nested = setup();
        let handle = &nested;

        let oid = nested
            .transact_async(TransactOptions::default(), move |db| async move {
                let (oid, _) = db.insert_new(Person::named("Per"))?;
                tokio::task::yield_now().await;

                handle
                    .transact_async(TransactOptions::default(), move |inner| async move {
                        tokio::task::yield_now().await;
                        assert!(inner.is_nested());
                        inner.get(oid).map(|_| ())
                    })
                    .await?;

                // Sync calls from inside the async flow nest too.
                handle.transact(TransactOptions::default(), |inner| {
                    assert!(inner.is_nested());
                    Ok(())
                })?;
                Ok(oid)
            })
            .await
            .unwrap();

        assert!(nested.inner().store().get(oid).is_some());
    }

    #[tokio::test]
    async fn test_async_nested_failure_aborts_outer() {
        let nested = setup();
        let handle = &nested;

        let result = nested
            .transact_async(TransactOptions::default(), move |db| async move {
                db.insert_new(Person::named("Per"))?;
                let inner: TransactResult<()> = handle
                    .transact_async(TransactOptions::default(), |_| async {
                        tokio::task::yield_now().await;
                        Err(TransactError::message("boom"))
                    })
                    .await;
                assert!(inner.is_err());
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_nested_abort());
        assert_eq!(nested.inner().store().stats().objects, 0);
    }

    #[tokio::test]
    async fn test_sibling_futures_are_not_nested() {
        let nested = setup();

        let (a, b) = tokio::join!(
            nested.transact_async(TransactOptions::default(), |db| async move {
                tokio::task::yield_now().await;
                Ok(db.is_nested())
            }),
            nested.transact_async(TransactOptions::default(), |db| async move {
                tokio::task::yield_now().await;
                Ok(db.is_nested())
            }),
        );

        assert!(!a.unwrap());
        assert!(!b.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_top_level_calls_are_not_nested() {
        let nested = Arc::new(setup());
        let barrier = Arc::new(Barrier::new(2));

        let tasks: Vec<_> = (0..2)
            .map(|i| {
                let nested = nested.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    nested
                        .transact_async(TransactOptions::default(), |db| async move {
                            // Both transactions are open at this point.
                            barrier.wait().await;
                            db.insert_new(Person::named(&format!("Person {}", i)))?;
                            Ok(db.is_nested())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(!task.await.unwrap().unwrap());
        }
        assert_eq!(nested.inner().store().stats().objects, 2);
    }
}
