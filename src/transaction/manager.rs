//! In-memory executor - runs callbacks in transactions of a [`MemoryStore`].
//!
//! The MemoryTransactor is the reference inner executor for the pipeline.
//! It handles:
//! - Transaction creation and lifecycle
//! - Tracking active transactions
//! - Commit on success, rollback on failure
//! - Detecting re-entrant calls on the same logical flow
//!
//! The transaction running on a flow is kept in a tokio task-local, so it
//! follows a callback across `.await` points but is never visible to other
//! tasks.

use std::future::Future;
use std::sync::Arc;

use tracing::trace;
use ulid::Ulid;

use crate::storage::MemoryStore;
use crate::transaction::context::{DatabaseContext, DbContext};
use crate::transaction::error::{TransactError, TransactResult};
use crate::transaction::memory::{ActiveTransactions, MemoryContext, TransactionMetadata};
use crate::transaction::options::TransactOptions;
use crate::transaction::transactor::{try_outcome, Transactor};

tokio::task_local! {
    static FLOW: FlowTransaction;
}

/// The transaction currently running on a logical flow.
#[derive(Clone)]
struct FlowTransaction {
    store_id: u64,
    ctx: Arc<MemoryContext>,
}

enum Plan {
    /// Run inside the transaction already active on this flow.
    Attach(Arc<MemoryContext>),
    /// Start a new transaction.
    Begin,
}

/// Executor over a [`MemoryStore`].
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct MemoryTransactor {
    inner: Arc<MemoryTransactorInner>,
}

struct MemoryTransactorInner {
    store: MemoryStore,
    active: ActiveTransactions,
}

impl MemoryTransactor {
    /// Create an executor for the given store.
    pub fn new(store: MemoryStore) -> Self {
        Self {
            inner: Arc::new(MemoryTransactorInner {
                store,
                active: ActiveTransactions::default(),
            }),
        }
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all active transaction IDs.
    pub fn active_transactions(&self) -> Vec<String> {
        self.inner.active.read().keys().cloned().collect()
    }

    /// Check if a transaction is active.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    /// Get metadata for an active transaction.
    pub fn get_transaction_info(&self, tx_id: &str) -> Option<TransactionMetadata> {
        self.inner.active.read().get(tx_id).cloned()
    }

    /// The transaction of this store running on the current flow, if any.
    fn current(&self) -> Option<Arc<MemoryContext>> {
        let store_id = self.inner.store.id();
        FLOW.try_with(|flow| (flow.store_id == store_id).then(|| flow.ctx.clone()))
            .ok()
            .flatten()
    }

    fn plan(&self, options: TransactOptions) -> TransactResult<Plan> {
        match self.current() {
            Some(ctx) if options.inner => {
                trace!(tx_id = %ctx.transaction_id(), "attaching to active transaction");
                Ok(Plan::Attach(ctx))
            }
            // Under a read-only transaction a re-entrant call runs independently.
            Some(ctx) if !ctx.is_read_only() => Err(TransactError::AlreadyExecuting),
            _ => Ok(Plan::Begin),
        }
    }

    fn begin(&self, options: TransactOptions) -> (Arc<MemoryContext>, FlowTransaction) {
        let tx_id = Ulid::new().to_string().to_lowercase();
        let ctx = Arc::new(MemoryContext::begin(
            self.inner.store.clone(),
            self.inner.active.clone(),
            tx_id,
            options.read_only,
        ));
        let flow = FlowTransaction {
            store_id: self.inner.store.id(),
            ctx: ctx.clone(),
        };
        (ctx, flow)
    }

    /// Commit on success, roll back on failure.
    fn finish<T>(ctx: &MemoryContext, result: TransactResult<T>) -> TransactResult<T> {
        match result {
            Ok(value) => {
                ctx.commit()?;
                Ok(value)
            }
            Err(e) => {
                ctx.rollback()?;
                Err(e)
            }
        }
    }
}

impl Transactor for MemoryTransactor {
    fn transact<T, F>(&self, options: TransactOptions, f: F) -> TransactResult<T>
    where
        F: FnOnce(DbContext) -> TransactResult<T>,
    {
        match self.plan(options)? {
            Plan::Attach(ctx) => {
                let db: DbContext = ctx;
                f(db)
            }
            Plan::Begin => {
                let (ctx, flow) = self.begin(options);
                let db: DbContext = ctx.clone();
                let result = FLOW.sync_scope(flow, || f(db));
                Self::finish(&ctx, result)
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
            match self.plan(options)? {
                Plan::Attach(ctx) => {
                    let db: DbContext = ctx;
                    f(db).await
                }
                Plan::Begin => {
                    let (ctx, flow) = self.begin(options);
                    let db: DbContext = ctx.clone();
                    let result = FLOW.scope(flow, async move { f(db).await }).await;
                    Self::finish(&ctx, result)
                }
            }
        }
    }

    fn try_transact<F>(&self, options: TransactOptions, f: F) -> TransactResult<bool>
    where
        F: FnOnce(DbContext) -> TransactResult<()>,
    {
        try_outcome(self.transact(options, f))
    }
}

impl std::fmt::Debug for MemoryTransactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransactor")
            .field("store", &self.inner.store)
            .field("active_count", &self.active_count())
            .finish()
    }
}
