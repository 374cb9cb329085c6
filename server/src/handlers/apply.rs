//! Apply handler - commits one queued mutation exactly once.
//!
//! The idempotency key is claimed in the same transaction as the writes. A
//! replay finds the key taken and answers `already_applied` without touching
//! any record; a refused write rolls back and leaves the key unclaimed.

use crate::auth::AuthUser;
use crate::db::{self, WriteResult};
use crate::error::{AppError, Result};
use ferry_engine::{
    ApplyRequest, ApplyResponse, Mutation, MutationMeta, OperationKind, StockAdjustment,
    PRIMARY_KEY,
};
use sqlx::{PgConnection, PgPool};

/// Process one apply request from a device.
pub async fn handle_apply(
    pool: &PgPool,
    auth: &AuthUser,
    request: ApplyRequest,
) -> Result<ApplyResponse> {
    auth.authorize(&request.user_id)?;

    let mutation = request.mutation();
    mutation.validate_shape()?;
    let record_id = primary_id(&mutation.table, &mutation.payload)?;

    let mut tx = pool.begin().await?;

    if !db::claim_mutation(&mut tx, &request, record_id).await? {
        tracing::debug!(
            key = %request.idempotency_key,
            table = %request.table,
            "mutation already applied"
        );
        return Ok(ApplyResponse::AlreadyApplied);
    }

    apply_mutation(&mut tx, &mutation, record_id, &request.user_id).await?;
    tx.commit().await?;

    tracing::info!(
        key = %request.idempotency_key,
        table = %request.table,
        operation = %request.operation,
        record = record_id,
        user = %request.user_id,
        "mutation applied"
    );

    Ok(ApplyResponse::Applied)
}

/// Primary write, then lines, then deductions.
async fn apply_mutation(
    conn: &mut PgConnection,
    mutation: &Mutation,
    record_id: &str,
    user_id: &str,
) -> Result<()> {
    let table = mutation.table.as_str();

    match (mutation.operation, &mutation.meta) {
        (OperationKind::Insert | OperationKind::Compound, _) => {
            let result =
                db::insert_record(conn, table, record_id, &mutation.payload, user_id).await?;
            check_write(result, table, record_id)?;
        }
        (OperationKind::Update, MutationMeta::Adjust(adjustment)) => {
            adjust(conn, adjustment, user_id).await?;
        }
        (OperationKind::Update, _) => {
            let result =
                db::merge_record(conn, table, record_id, &mutation.payload, user_id).await?;
            check_write(result, table, record_id)?;
        }
        (OperationKind::Delete, _) => {
            db::delete_record(conn, table, record_id, user_id).await?;
        }
    }

    match &mutation.meta {
        MutationMeta::None | MutationMeta::Adjust(_) => {}
        MutationMeta::SessionUsage { deductions } => {
            for deduction in deductions {
                adjust(conn, deduction, user_id).await?;
            }
        }
        MutationMeta::OrderPlacement {
            line_table,
            lines,
            deductions,
        } => {
            for line in lines {
                let line_id = primary_id(line_table, line)?;
                let result = db::insert_record(conn, line_table, line_id, line, user_id).await?;
                check_write(result, line_table, line_id)?;
            }
            for deduction in deductions {
                adjust(conn, deduction, user_id).await?;
            }
        }
    }

    Ok(())
}

async fn adjust(conn: &mut PgConnection, adjustment: &StockAdjustment, user_id: &str) -> Result<()> {
    let result = db::adjust_counter(conn, adjustment, user_id).await?;
    check_write(result, &adjustment.table, &adjustment.record_id)
}

fn primary_id<'a>(table: &str, payload: &'a serde_json::Value) -> Result<&'a str> {
    payload
        .get(PRIMARY_KEY)
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AppError::Engine(ferry_engine::Error::MissingPrimaryKey {
                table: table.to_string(),
                field: PRIMARY_KEY.to_string(),
            })
        })
}

/// Map a refused write to the error devices show their operator.
pub fn check_write(result: WriteResult, table: &str, record_id: &str) -> Result<()> {
    match result {
        WriteResult::Written => Ok(()),
        WriteResult::Exists => Err(AppError::Conflict(format!(
            "{table}/{record_id} already exists"
        ))),
        WriteResult::Missing => Err(AppError::NotFound(format!("{table}/{record_id}"))),
        WriteResult::Insufficient => Err(AppError::Conflict(format!(
            "Insufficient stock for {record_id}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn refused_writes_are_client_errors() {
        let insufficient = check_write(WriteResult::Insufficient, "inventory", "beans").unwrap_err();
        assert_eq!(insufficient.status(), StatusCode::CONFLICT);
        assert_eq!(insufficient.to_string(), "Insufficient stock for beans");

        let missing = check_write(WriteResult::Missing, "sessions", "s-9").unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        assert!(check_write(WriteResult::Written, "sessions", "s-1").is_ok());
    }

    #[test]
    fn primary_id_is_required() {
        let payload = json!({"id": "o-1", "total": 12});
        assert_eq!(primary_id("orders", &payload).unwrap(), "o-1");

        let err = primary_id("orders", &json!({"total": 12})).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(primary_id("orders", &json!({"id": ""})).is_err());
    }
}
