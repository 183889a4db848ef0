use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ForecastResult;

#[derive(Clone)]
pub struct ForecastDb {
    pool: SqlitePool,
}

impl ForecastDb {
    /// Connect and apply the schema.
    pub async fn new(database_url: &str, max_connections: u32) -> ForecastResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Each in-memory connection is its own database, so keep exactly one alive.
        let pool = if Self::is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.init_schema().await?;

        tracing::debug!("Connected to {}", database_url);
        Ok(db)
    }

    /// Fresh in-memory database with the schema applied.
    pub async fn in_memory() -> ForecastResult<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    async fn init_schema(&self) -> ForecastResult<()> {
        let schema = include_str!("../schema.sql");

        // sqlx runs one statement per query
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn is_in_memory(database_url: &str) -> bool {
        database_url.contains(":memory:") || database_url.contains("mode=memory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_db_creation() {
        let db = ForecastDb::in_memory().await.unwrap();
        assert!(db.pool().acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_schema_is_reapplicable() {
        let db = ForecastDb::in_memory().await.unwrap();
        db.init_schema().await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
             ('a_stock_comment_daily', 'etf_daily', 'best_predictions',
              'validation_chunks', 'strategy_params', 'backtest_results', 'user_watchlist')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn test_memory_url_detection() {
        assert!(ForecastDb::is_in_memory("sqlite::memory:"));
        assert!(ForecastDb::is_in_memory("sqlite:file:test?mode=memory&cache=shared"));
        assert!(!ForecastDb::is_in_memory("sqlite:forecast.db"));
    }
}
