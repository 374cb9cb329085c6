//! Error types for the Ferry engine.

use crate::{EntryId, EntryStatus, OperationKind, TableName};
use thiserror::Error;

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("missing primary key '{field}' in {table} payload")]
    MissingPrimaryKey { table: TableName, field: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid meta for {operation}: {reason}")]
    InvalidMeta {
        operation: OperationKind,
        reason: String,
    },

    #[error("field '{field}' of {table} is not a counter")]
    NotACounter { table: TableName, field: String },

    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    // Queue errors
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("idempotency key already queued: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("entry id {id} is not greater than the last issued id {last}")]
    NonMonotonicId { id: EntryId, last: EntryId },

    #[error("entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: EntryId,
        from: EntryStatus,
        to: EntryStatus,
    },

    #[error("entry {id} is {status}; only failed or synced entries can be removed")]
    NotRemovable { id: EntryId, status: EntryStatus },

    // Optimistic state errors
    #[error("snapshot already taken for entry {0}")]
    SnapshotExists(EntryId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
