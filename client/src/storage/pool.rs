//! Database connection pool management.

use crate::config::ClientConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Type alias for the database pool.
pub type Pool = SqlitePool;

/// Open the local store described by `config`, creating the file if needed.
///
/// An in-memory store is pinned to a single connection that never expires;
/// otherwise each new connection would see an empty database.
pub async fn create_pool(config: &ClientConfig) -> Result<Pool, sqlx::Error> {
    let mut options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);

    if config.is_in_memory() {
        return SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await;
    }

    options = options.journal_mode(SqliteJournalMode::Wal);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
