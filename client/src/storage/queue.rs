//! Database operations for the mutation_queue table.

use crate::error::{ClientError, Result};
use ferry_engine::{
    EntryId, EntryStatus, IdempotencyKey, Mutation, MutationMeta, OperationKind, QueueEntry,
    Timestamp,
};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};

/// A stored queue row from the database.
#[derive(Debug)]
pub struct StoredEntry {
    pub id: i64,
    pub table_name: String,
    pub operation: String,
    pub payload: String,
    pub meta: String,
    pub user_id: String,
    pub idempotency_key: String,
    pub status: String,
    pub retry_count: i64,
    pub error: Option<String>,
    pub created_at: i64,
    pub next_attempt_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredEntry {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredEntry {
            id: row.try_get("id")?,
            table_name: row.try_get("table_name")?,
            operation: row.try_get("operation")?,
            payload: row.try_get("payload")?,
            meta: row.try_get("meta")?,
            user_id: row.try_get("user_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
        })
    }
}

impl StoredEntry {
    /// Convert the database row to an engine queue entry.
    pub fn to_entry(&self) -> Result<QueueEntry> {
        let corrupt = |reason: String| ClientError::CorruptEntry {
            id: self.id,
            reason,
        };

        let operation = OperationKind::parse(&self.operation)
            .ok_or_else(|| corrupt(format!("unknown operation {:?}", self.operation)))?;
        let status = EntryStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", self.status)))?;
        let payload: serde_json::Value =
            serde_json::from_str(&self.payload).map_err(|e| corrupt(e.to_string()))?;
        let meta: MutationMeta =
            serde_json::from_str(&self.meta).map_err(|e| corrupt(e.to_string()))?;
        let key = IdempotencyKey::parse(self.idempotency_key.as_str())
            .map_err(|e| corrupt(e.to_string()))?;

        let mutation = Mutation::new(self.table_name.clone(), operation, payload, meta);
        let mut entry = QueueEntry::new(
            self.id as EntryId,
            mutation,
            self.user_id.clone(),
            key,
            self.created_at as Timestamp,
        );
        entry.status = status;
        entry.retry_count = self.retry_count as u32;
        entry.error = self.error.clone();
        entry.next_attempt_at = self.next_attempt_at as Timestamp;
        Ok(entry)
    }
}

/// Insert a pending row and return the id the store assigned.
pub async fn insert_entry<'e, E>(
    executor: E,
    mutation: &Mutation,
    user_id: &str,
    key: &IdempotencyKey,
    created_at: Timestamp,
) -> Result<EntryId>
where
    E: Executor<'e, Database = Sqlite>,
{
    let payload = serde_json::to_string(&mutation.payload)?;
    let meta = serde_json::to_string(&mutation.meta)?;

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO mutation_queue (
            table_name, operation, payload, meta, user_id,
            idempotency_key, status, retry_count, created_at, next_attempt_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $7)
        RETURNING id
        "#,
    )
    .bind(&mutation.table)
    .bind(mutation.operation.as_str())
    .bind(payload)
    .bind(meta)
    .bind(user_id)
    .bind(key.as_str())
    .bind(created_at as i64)
    .fetch_one(executor)
    .await?;

    Ok(id as EntryId)
}

/// Persist the mutable part of an entry: status, attempts, error, backoff.
pub async fn save_entry_state<'e, E>(executor: E, entry: &QueueEntry) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE mutation_queue
        SET status = $2, retry_count = $3, error = $4, next_attempt_at = $5
        WHERE id = $1
        "#,
    )
    .bind(entry.id as i64)
    .bind(entry.status.as_str())
    .bind(entry.retry_count as i64)
    .bind(&entry.error)
    .bind(entry.next_attempt_at as i64)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete a row. Returns whether it existed.
pub async fn delete_entry<'e, E>(executor: E, id: EntryId) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM mutation_queue WHERE id = $1")
        .bind(id as i64)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Every stored entry in id order.
pub async fn load_entries<'e, E>(executor: E) -> Result<Vec<QueueEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, StoredEntry>(
        r#"
        SELECT id, table_name, operation, payload, meta, user_id,
               idempotency_key, status, retry_count, error,
               created_at, next_attempt_at
        FROM mutation_queue
        ORDER BY id ASC
        "#,
    )
    .fetch_all(executor)
    .await?;

    rows.iter().map(StoredEntry::to_entry).collect()
}

/// Put rows left in flight by a crash back to pending.
pub async fn recover_in_flight<'e, E>(executor: E) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE mutation_queue SET status = 'pending' WHERE status = 'in_flight'",
    )
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
