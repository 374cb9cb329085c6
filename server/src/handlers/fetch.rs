//! Fetch handler - serves the authoritative contents of a table.

use crate::db;
use crate::error::Result;
use ferry_engine::FetchResponse;
use serde::Deserialize;
use sqlx::PgPool;

/// Query parameters for a table read.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchQuery {
    /// Last record id of the previous page
    pub after: Option<String>,
    /// Maximum number of records to return
    pub limit: Option<i64>,
}

/// Default page size.
const DEFAULT_LIMIT: i64 = 100;

/// Maximum page size.
const MAX_LIMIT: i64 = 1000;

impl FetchQuery {
    fn page_size(&self) -> i64 {
        self.limit
            .map(|l| l.clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT)
    }
}

/// Read one page of live records of `table`.
pub async fn handle_fetch(pool: &PgPool, table: String, query: FetchQuery) -> Result<FetchResponse> {
    let limit = query.page_size();

    // Fetch one more than requested to check if there are more
    let mut stored = db::list_records(pool, &table, query.after.as_deref(), limit + 1).await?;

    let has_more = stored.len() as i64 > limit;
    stored.truncate(limit as usize);
    let next_cursor = if has_more {
        stored.last().map(|record| record.record_id.clone())
    } else {
        None
    };

    let records: Vec<_> = stored.into_iter().map(db::StoredRecord::into_payload).collect();

    tracing::debug!(
        table = %table,
        count = records.len(),
        has_more,
        "served table page"
    );

    Ok(FetchResponse {
        table,
        records,
        next_cursor,
    })
}
