//! Database operations for the applied_mutations ledger.

use chrono::{DateTime, Utc};
use ferry_engine::ApplyRequest;
use serde::Serialize;
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};

/// A ledger row: one committed idempotency key.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMutation {
    pub idempotency_key: String,
    pub table_name: String,
    pub operation: String,
    pub record_id: String,
    pub user_id: String,
    pub applied_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredMutation {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredMutation {
            idempotency_key: row.try_get("idempotency_key")?,
            table_name: row.try_get("table_name")?,
            operation: row.try_get("operation")?,
            record_id: row.try_get("record_id")?,
            user_id: row.try_get("user_id")?,
            applied_at: row.try_get("applied_at")?,
        })
    }
}

/// Record the request's key inside the caller's transaction.
///
/// Returns `false` when the key is already in the ledger. The row only becomes
/// visible if the transaction commits, so a rejected write leaves the key free.
pub async fn claim_mutation(
    conn: &mut PgConnection,
    request: &ApplyRequest,
    record_id: &str,
) -> Result<bool, sqlx::Error> {
    let claimed: Option<(String,)> = sqlx::query_as(
        r#"
        INSERT INTO applied_mutations (idempotency_key, table_name, operation, record_id, user_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING idempotency_key
        "#,
    )
    .bind(request.idempotency_key.as_str())
    .bind(&request.table)
    .bind(request.operation.as_str())
    .bind(record_id)
    .bind(&request.user_id)
    .fetch_optional(conn)
    .await?;

    Ok(claimed.is_some())
}

/// Look up a committed key.
pub async fn get_applied(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<StoredMutation>, sqlx::Error> {
    sqlx::query_as::<_, StoredMutation>(
        r#"
        SELECT idempotency_key, table_name, operation, record_id, user_id, applied_at
        FROM applied_mutations
        WHERE idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
}
