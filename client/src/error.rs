//! Error types for the device runtime.

use crate::config::ConfigError;
use ferry_engine::{EntryId, EntryStatus};

/// Errors surfaced to callers of the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The local durable store failed; the originating action did not happen
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Engine(#[from] ferry_engine::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt queue row {id}: {reason}")]
    CorruptEntry { id: i64, reason: String },

    #[error("corrupt cache row {collection}/{id}: {reason}")]
    CorruptCache {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("entry {id} is {status}; only failed entries can be discarded")]
    NotDiscardable { id: EntryId, status: EntryStatus },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
