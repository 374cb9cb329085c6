//! Wire types shared by the client and the remote store.
//!
//! Each queue entry is submitted as one [`ApplyRequest`]; the remote answers
//! with an [`ApplyResponse`]. Transport failures never produce a response, so
//! the client folds both into a [`RemoteOutcome`].

use crate::{
    IdempotencyKey, Mutation, MutationMeta, OperationKind, QueueEntry, TableName, UserId,
};
use serde::{Deserialize, Serialize};

/// The single "apply mutation" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub table: TableName,
    pub operation: OperationKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub meta: MutationMeta,
    pub idempotency_key: IdempotencyKey,
    pub user_id: UserId,
}

impl ApplyRequest {
    /// The mutation carried by this request.
    pub fn mutation(&self) -> Mutation {
        Mutation::new(
            self.table.clone(),
            self.operation,
            self.payload.clone(),
            self.meta.clone(),
        )
    }
}

impl From<&QueueEntry> for ApplyRequest {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            table: entry.table.clone(),
            operation: entry.operation,
            payload: entry.payload.clone(),
            meta: entry.meta.clone(),
            idempotency_key: entry.idempotency_key.clone(),
            user_id: entry.user_id.clone(),
        }
    }
}

/// What the remote answers when it received the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyResponse {
    /// Committed now
    Applied,
    /// The idempotency key was already committed earlier
    AlreadyApplied,
    /// Authorization, validation or business rule refused the write
    Rejected { reason: String },
}

/// Classified result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    AlreadyApplied,
    /// Terminal without operator action; reason is shown verbatim
    Rejected(String),
    /// Network error, timeout or overload; safe to retry
    Unavailable(String),
}

impl RemoteOutcome {
    /// Applied and already-applied both prove the write is committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, RemoteOutcome::Applied | RemoteOutcome::AlreadyApplied)
    }
}

impl From<ApplyResponse> for RemoteOutcome {
    fn from(response: ApplyResponse) -> Self {
        match response {
            ApplyResponse::Applied => RemoteOutcome::Applied,
            ApplyResponse::AlreadyApplied => RemoteOutcome::AlreadyApplied,
            ApplyResponse::Rejected { reason } => RemoteOutcome::Rejected(reason),
        }
    }
}

/// One page of an authoritative read of a table, ordered by record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub table: TableName,
    pub records: Vec<serde_json::Value>,
    /// Pass back as `after` to read the next page; absent on the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StockAdjustment;
    use serde_json::json;

    #[test]
    fn request_from_entry_keeps_key() {
        let key = IdempotencyKey::generate();
        let entry = QueueEntry::new(
            3,
            Mutation::adjust(StockAdjustment::decrement("inventory", "i-1", "quantity", 3)),
            "user-1",
            key.clone(),
            1_000,
        );

        let request = ApplyRequest::from(&entry);
        assert_eq!(request.idempotency_key, key);
        assert_eq!(request.user_id, "user-1");
        assert_eq!(request.mutation(), entry.mutation());
    }

    #[test]
    fn response_wire_format() {
        assert_eq!(
            serde_json::to_value(ApplyResponse::AlreadyApplied).unwrap(),
            json!({"status": "already_applied"})
        );
        let rejected: ApplyResponse =
            serde_json::from_value(json!({"status": "rejected", "reason": "insufficient stock"}))
                .unwrap();
        assert_eq!(
            RemoteOutcome::from(rejected),
            RemoteOutcome::Rejected("insufficient stock".into())
        );
    }

    #[test]
    fn last_page_has_no_cursor() {
        let page: FetchResponse =
            serde_json::from_value(json!({"table": "inventory", "records": [{"id": "i-1"}]}))
                .unwrap();
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.records.len(), 1);

        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("nextCursor").is_none());
    }

    #[test]
    fn committed_outcomes() {
        assert!(RemoteOutcome::Applied.is_committed());
        assert!(RemoteOutcome::AlreadyApplied.is_committed());
        assert!(!RemoteOutcome::Unavailable("timeout".into()).is_committed());
        assert!(!RemoteOutcome::Rejected("denied".into()).is_committed());
    }
}
