//! Database operations for the records table.
//!
//! Every write takes a `PgConnection` so the apply handler can run a whole
//! mutation, side-payloads included, in one transaction.

use ferry_engine::{StockAdjustment, PRIMARY_KEY};
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub record_id: String,
    pub payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            record_id: row.try_get("record_id")?,
            payload: row.try_get("payload")?,
        })
    }
}

/// Outcome of a write that can be refused by the current row state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written,
    /// A live record with this id already exists
    Exists,
    /// No live record with this id
    Missing,
    /// The counter would drop below zero
    Insufficient,
}

/// Insert a record, reviving it if it was deleted earlier.
pub async fn insert_record(
    conn: &mut PgConnection,
    table: &str,
    record_id: &str,
    payload: &serde_json::Value,
    user_id: &str,
) -> Result<WriteResult, sqlx::Error> {
    let written: Option<(String,)> = sqlx::query_as(
        r#"
        INSERT INTO records (table_name, record_id, payload, updated_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (table_name, record_id) DO UPDATE SET
            payload = EXCLUDED.payload,
            deleted = FALSE,
            updated_by = EXCLUDED.updated_by,
            updated_at = NOW()
        WHERE records.deleted
        RETURNING record_id
        "#,
    )
    .bind(table)
    .bind(record_id)
    .bind(payload)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;

    Ok(match written {
        Some(_) => WriteResult::Written,
        None => WriteResult::Exists,
    })
}

/// Overwrite the fields present in `patch`; absent fields are kept.
pub async fn merge_record(
    conn: &mut PgConnection,
    table: &str,
    record_id: &str,
    patch: &serde_json::Value,
    user_id: &str,
) -> Result<WriteResult, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE records
        SET payload = payload || $3, updated_by = $4, updated_at = NOW()
        WHERE table_name = $1 AND record_id = $2 AND NOT deleted
        "#,
    )
    .bind(table)
    .bind(record_id)
    .bind(patch)
    .bind(user_id)
    .execute(conn)
    .await?;

    Ok(if result.rows_affected() > 0 {
        WriteResult::Written
    } else {
        WriteResult::Missing
    })
}

/// Soft-delete a record. Deleting a missing record is not an error.
pub async fn delete_record(
    conn: &mut PgConnection,
    table: &str,
    record_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE records
        SET deleted = TRUE, updated_by = $3, updated_at = NOW()
        WHERE table_name = $1 AND record_id = $2 AND NOT deleted
        "#,
    )
    .bind(table)
    .bind(record_id)
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Add `delta` to a counter in one statement, refusing to go below zero.
///
/// Concurrent adjustments from different devices serialize on the row lock,
/// so each one sees the result of the previous.
pub async fn adjust_counter(
    conn: &mut PgConnection,
    adjustment: &StockAdjustment,
    user_id: &str,
) -> Result<WriteResult, sqlx::Error> {
    let updated: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE records
        SET payload = jsonb_set(
                payload,
                ARRAY[$3::TEXT],
                to_jsonb(COALESCE((payload->>$3)::BIGINT, 0) + $4)
            ),
            updated_by = $5,
            updated_at = NOW()
        WHERE table_name = $1 AND record_id = $2 AND NOT deleted
          AND COALESCE((payload->>$3)::BIGINT, 0) + $4 >= 0
        RETURNING record_id
        "#,
    )
    .bind(&adjustment.table)
    .bind(&adjustment.record_id)
    .bind(&adjustment.field)
    .bind(adjustment.delta)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    if updated.is_some() {
        return Ok(WriteResult::Written);
    }

    let exists: Option<(bool,)> = sqlx::query_as(
        "SELECT deleted FROM records WHERE table_name = $1 AND record_id = $2",
    )
    .bind(&adjustment.table)
    .bind(&adjustment.record_id)
    .fetch_optional(conn)
    .await?;

    Ok(match exists {
        Some((false,)) => WriteResult::Insufficient,
        _ => WriteResult::Missing,
    })
}

/// One page of live records ordered by id, starting after `after`.
pub async fn list_records(
    pool: &PgPool,
    table: &str,
    after: Option<&str>,
    limit: i64,
) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT record_id, payload
        FROM records
        WHERE table_name = $1 AND NOT deleted
          AND ($2::TEXT IS NULL OR record_id > $2)
        ORDER BY record_id ASC
        LIMIT $3
        "#,
    )
    .bind(table)
    .bind(after)
    .bind(limit)
    .fetch_all(pool)
    .await
}

impl StoredRecord {
    /// Payload as served to devices, always carrying its primary key.
    pub fn into_payload(self) -> serde_json::Value {
        let mut payload = self.payload;
        if let Some(object) = payload.as_object_mut() {
            object
                .entry(PRIMARY_KEY)
                .or_insert_with(|| serde_json::Value::String(self.record_id));
        }
        payload
    }
}
