//! Record store error types

use thiserror::Error;

use crate::storage::types::Oid;

/// errors raised by the in-memory record store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// no object with this id is visible to the transaction
    #[error("object not found: {0}")]
    ObjectNotFound(Oid),

    /// the object is already stored under another id
    #[error("object is already stored with id {0}")]
    AlreadyStored(Oid),

    /// the object is not stored in this transaction
    #[error("object is not stored")]
    NotStored,

    /// the object exists but is not of the requested type
    #[error("object {oid} is not a {expected}")]
    TypeMismatch { oid: Oid, expected: &'static str },

    /// the object was written by a commit the transaction did not see
    #[error("object {0} was changed by a concurrent transaction")]
    WriteConflict(Oid),
}

impl StorageError {
    /// check if this error indicates the object doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectNotFound(_))
    }

    /// check if this error was caused by a concurrent commit
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::WriteConflict(_))
    }
}
