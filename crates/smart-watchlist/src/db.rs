use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::models::WatchlistItem;

/// SQLite handle for the watchlist and its derived-metric rows.
#[derive(Clone)]
pub struct WatchlistDb {
    pool: SqlitePool,
}

impl WatchlistDb {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` is a separate database, so pin one
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");

        // sqlx executes one statement per query
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

    /// Returns false if the ticker was already watched.
    pub async fn add_ticker(&self, ticker: &str, company_name: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO watchlist (ticker, company_name, added_at) VALUES (?, ?, ?)",
        )
        .bind(ticker)
        .bind(company_name)
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns false if it was not watched. Metric rows are cleared
    /// separately through the metric store.
    pub async fn remove_ticker(&self, ticker: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE ticker = ?")
            .bind(ticker)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn is_in_watchlist(&self, ticker: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM watchlist WHERE ticker = ?")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Most recently added first.
    pub async fn list(&self) -> Result<Vec<WatchlistItem>> {
        let items = sqlx::query_as::<_, WatchlistItem>(
            "SELECT ticker, company_name, added_at FROM watchlist ORDER BY added_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn tickers(&self) -> Result<Vec<String>> {
        Ok(self.list().await?.into_iter().map(|item| item.ticker).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlist")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
