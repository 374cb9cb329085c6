//! Queue entry types.

use crate::{
    EntryId, IdempotencyKey, Mutation, MutationMeta, OperationKind, TableName, Timestamp, UserId,
    PRIMARY_KEY,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for a dispatcher pass
    Pending,
    /// Submitted to the remote, outcome not yet known
    InFlight,
    /// Given up automatically; waits for an operator
    Failed,
    /// Committed remotely; pruned right after
    Synced,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::InFlight => "in_flight",
            EntryStatus::Failed => "failed",
            EntryStatus::Synced => "synced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EntryStatus::Pending),
            "in_flight" => Some(EntryStatus::InFlight),
            "failed" => Some(EntryStatus::Failed),
            "synced" => Some(EntryStatus::Synced),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable intended write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Monotonic local id; insertion order is application order per table
    pub id: EntryId,
    /// Target table
    pub table: TableName,
    /// Operation tag
    pub operation: OperationKind,
    /// Primary record
    pub payload: serde_json::Value,
    /// Side-payloads replayed with the primary record
    pub meta: MutationMeta,
    /// Acting principal
    pub user_id: UserId,
    /// Fixed at enqueue time, never regenerated
    pub idempotency_key: IdempotencyKey,
    /// Lifecycle status
    pub status: EntryStatus,
    /// Attempts made so far
    pub retry_count: u32,
    /// Last failure message, kept while failed
    pub error: Option<String>,
    /// Enqueue time (ms since epoch)
    pub created_at: Timestamp,
    /// Earliest time the next attempt may start (ms since epoch)
    pub next_attempt_at: Timestamp,
}

impl QueueEntry {
    /// Create a pending entry for a mutation.
    pub fn new(
        id: EntryId,
        mutation: Mutation,
        user_id: impl Into<UserId>,
        idempotency_key: IdempotencyKey,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            table: mutation.table,
            operation: mutation.operation,
            payload: mutation.payload,
            meta: mutation.meta,
            user_id: user_id.into(),
            idempotency_key,
            status: EntryStatus::Pending,
            retry_count: 0,
            error: None,
            created_at,
            next_attempt_at: created_at,
        }
    }

    /// Rebuild the mutation this entry carries.
    pub fn mutation(&self) -> Mutation {
        Mutation::new(
            self.table.clone(),
            self.operation,
            self.payload.clone(),
            self.meta.clone(),
        )
    }

    /// The primary record's id.
    pub fn record_id(&self) -> Option<&str> {
        self.payload.get(PRIMARY_KEY).and_then(|v| v.as_str())
    }

    /// Pending or in flight: the engine still owns this entry.
    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, EntryStatus::Pending | EntryStatus::InFlight)
    }

    /// Pending and past its backoff.
    pub fn is_ready(&self, now: Timestamp) -> bool {
        self.status == EntryStatus::Pending && self.next_attempt_at <= now
    }

    /// Human-readable description for operators.
    pub fn describe(&self) -> String {
        self.mutation().describe()
    }
}
