//! Transaction error types.

use std::sync::Arc;

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for transaction operations.
pub type TransactResult<T> = Result<T, TransactError>;

/// Errors that can occur while running a unit of work through the pipeline.
///
/// Cloneable so the nesting stage can hand the same failure both to the
/// nested caller and to the enclosing transaction.
#[derive(Debug, Clone, Error)]
pub enum TransactError {
    /// Record store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Failure raised by application code inside a transaction.
    #[error("transaction callback failed: {0}")]
    Callback(Arc<dyn std::error::Error + Send + Sync>),

    /// A nested call failed and the enclosing transaction was aborted.
    #[error("nested transaction failed: {cause}")]
    NestedTransactionAborted {
        /// The failure raised inside the nested call.
        #[source]
        cause: Box<TransactError>,
    },

    /// A transaction is already executing on this logical flow.
    #[error("a transaction is already executing on this flow")]
    AlreadyExecuting,

    /// The context is no longer attached to an open transaction.
    #[error("no transaction attached")]
    NoTransaction,

    /// The callback completed but the transaction had been rolled back.
    #[error("transaction {tx_id} was rolled back")]
    RolledBack { tx_id: String },

    /// Write attempted inside a read-only transaction.
    #[error("transaction {tx_id} is read-only")]
    ReadOnly { tx_id: String },

    /// A hook is already registered for this type.
    #[error("hook already registered for type {type_name}")]
    DuplicateHook { type_name: &'static str },

    /// The transaction committed, but a step running after the commit failed.
    #[error("transaction committed, but a post-commit step failed: {0}")]
    AfterCommit(Box<TransactError>),
}

impl TransactError {
    /// Wrap an application error.
    pub fn callback<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(error))
    }

    /// Wrap an application error message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Callback(Arc::new(CallbackMessage(message.into())))
    }

    /// Wrap the failure of a nested call.
    pub fn nested_aborted(cause: TransactError) -> Self {
        Self::NestedTransactionAborted {
            cause: Box::new(cause),
        }
    }

    /// Check if this error is the nesting stage's abort signal.
    pub fn is_nested_abort(&self) -> bool {
        matches!(self, TransactError::NestedTransactionAborted { .. })
    }

    /// Check if the transaction's writes were committed despite the error.
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactError::AfterCommit(_))
    }

    /// Check if running the same unit of work again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactError::NestedTransactionAborted { cause } => cause.is_retryable(),
            TransactError::RolledBack { .. } => true,
            TransactError::Storage(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// The innermost failure, following nested aborts and post-commit wrapping.
    pub fn root_cause(&self) -> &TransactError {
        match self {
            TransactError::NestedTransactionAborted { cause } => cause.root_cause(),
            TransactError::AfterCommit(inner) => inner.root_cause(),
            other => other,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct CallbackMessage(String);
