use analysis_core::{
    DerivedMetricRecord, MetricKind, MetricStatus, MetricStore, MetricValue, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
struct MetricRow {
    ticker: String,
    metric_kind: String,
    status: String,
    payload: Option<String>,
    last_updated: Option<String>,
}

/// `derived_metrics` table accessor. One row per (ticker, metric kind).
///
/// Writes for a ticker that is no longer on the watchlist are dropped, so a
/// computation finishing after removal cannot bring its rows back.
#[derive(Clone)]
pub struct SqliteMetricStore {
    pool: SqlitePool,
}

impl SqliteMetricStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricStore for SqliteMetricStore {
    async fn upsert(&self, record: &DerivedMetricRecord) -> Result<(), StoreError> {
        let payload = record.value.as_ref().map(serde_json::to_string).transpose()?;
        let headline = record.value.as_ref().and_then(MetricValue::headline);
        let last_updated = record
            .last_updated
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true));

        let result = sqlx::query(
            r#"
            INSERT INTO derived_metrics (ticker, metric_kind, value, status, payload, last_updated)
            SELECT ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM watchlist WHERE ticker = ?)
            ON CONFLICT(ticker, metric_kind) DO UPDATE SET
                value = excluded.value,
                status = excluded.status,
                payload = excluded.payload,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&record.ticker)
        .bind(record.kind.as_str())
        .bind(headline)
        .bind(record.status.as_str())
        .bind(payload)
        .bind(last_updated)
        .bind(&record.ticker)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            tracing::info!(
                "{} is no longer watched, dropping {} result",
                record.ticker,
                record.kind
            );
        }

        Ok(())
    }

    async fn get(
        &self,
        ticker: &str,
        kind: MetricKind,
    ) -> Result<Option<DerivedMetricRecord>, StoreError> {
        let row = sqlx::query_as::<_, MetricRow>(
            "SELECT ticker, metric_kind, status, payload, last_updated
             FROM derived_metrics WHERE ticker = ? AND metric_kind = ?",
        )
        .bind(ticker)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(row_to_record).transpose()
    }

    async fn get_all_for_ticker(
        &self,
        ticker: &str,
    ) -> Result<Vec<DerivedMetricRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MetricRow>(
            "SELECT ticker, metric_kind, status, payload, last_updated
             FROM derived_metrics WHERE ticker = ? ORDER BY metric_kind",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_record(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable metric row for {}: {}", ticker, e),
            }
        }
        Ok(records)
    }

    async fn delete_for_ticker(&self, ticker: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM derived_metrics WHERE ticker = ?")
            .bind(ticker)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_to_record(row: MetricRow) -> Result<DerivedMetricRecord, StoreError> {
    let kind: MetricKind = row.metric_kind.parse().map_err(StoreError::Database)?;

    // An unknown status string is treated as an attempt that never finished
    let status = row.status.parse::<MetricStatus>().unwrap_or_else(|e| {
        tracing::warn!("{} {}: {}", row.ticker, kind, e);
        MetricStatus::Pending
    });

    let value = match row.payload.as_deref() {
        Some(json) if !json.is_empty() => {
            let value: MetricValue = serde_json::from_str(json)?;
            // A payload for a different kind is never served
            (value.kind() == kind).then_some(value)
        }
        _ => None,
    };

    Ok(DerivedMetricRecord {
        ticker: row.ticker,
        kind,
        status,
        value,
        last_updated: row.last_updated.as_deref().and_then(parse_timestamp),
    })
}

/// RFC 3339, or a naive ISO timestamp taken as UTC. Anything else is `None`.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
