//! Database operations for the read_cache table.

use crate::error::{ClientError, Result};
use ferry_engine::{LocalRecord, RecordChange, Revision, Timestamp};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqliteConnection};

/// A cached record row from the database.
#[derive(Debug)]
pub struct CachedRecord {
    pub collection: String,
    pub owner_id: String,
    pub revision: i64,
    pub payload: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for CachedRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(CachedRecord {
            collection: row.try_get("collection")?,
            owner_id: row.try_get("owner_id")?,
            revision: row.try_get("revision")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl CachedRecord {
    pub fn to_record(&self) -> Result<LocalRecord> {
        let payload = serde_json::from_str(&self.payload).map_err(|e| ClientError::CorruptCache {
            collection: self.collection.clone(),
            id: self.owner_id.clone(),
            reason: e.to_string(),
        })?;
        Ok(LocalRecord {
            table: self.collection.clone(),
            id: self.owner_id.clone(),
            revision: self.revision as Revision,
            payload,
        })
    }
}

/// Every cached record.
pub async fn load_records<'e, E>(executor: E) -> Result<Vec<LocalRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, CachedRecord>(
        "SELECT collection, owner_id, revision, payload FROM read_cache",
    )
    .fetch_all(executor)
    .await?;
    rows.iter().map(CachedRecord::to_record).collect()
}

/// Write local state changes through to the cache.
pub async fn write_changes(
    conn: &mut SqliteConnection,
    changes: &[RecordChange],
    now: Timestamp,
) -> Result<()> {
    for change in changes {
        match &change.record {
            Some(record) => {
                sqlx::query(
                    r#"
                    INSERT INTO read_cache (collection, owner_id, revision, payload, updated_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (collection, owner_id) DO UPDATE SET
                        revision = excluded.revision,
                        payload = excluded.payload,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&record.table)
                .bind(&record.id)
                .bind(record.revision as i64)
                .bind(serde_json::to_string(&record.payload)?)
                .bind(now as i64)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM read_cache WHERE collection = $1 AND owner_id = $2")
                    .bind(&change.table)
                    .bind(&change.id)
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }
    Ok(())
}
