//! Watchlist read models

use analysis_core::{AdjustedPeBreakdown, DerivedMetricRecord, GrowthEstimate, MetricStatus, ShortInterest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A watched ticker as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WatchlistItem {
    pub ticker: String,
    pub company_name: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// One metric as displayed: the value if usable, otherwise whether a
/// computation is underway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricView<T> {
    pub value: Option<T>,
    pub status: Option<MetricStatus>,
    pub loading: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> MetricView<T> {
    pub fn resolved(record: Option<&DerivedMetricRecord>, value: Option<T>) -> Self {
        Self {
            value,
            status: record.map(|r| r.status),
            loading: false,
            last_updated: record.and_then(|r| r.last_updated),
        }
    }

    pub fn loading(record: Option<&DerivedMetricRecord>) -> Self {
        Self {
            value: None,
            status: record.map(|r| r.status),
            loading: true,
            last_updated: record.and_then(|r| r.last_updated),
        }
    }
}

/// Display record for one watched ticker. The composites are derived from
/// the resolved metric values and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub ticker: String,
    pub company_name: Option<String>,
    pub added_at: DateTime<Utc>,
    pub adjusted_pe: MetricView<AdjustedPeBreakdown>,
    pub growth: MetricView<GrowthEstimate>,
    pub short_interest: MetricView<ShortInterest>,
    /// Annualized two-year revenue growth, percent
    pub two_year_growth: Option<f64>,
    pub two_year_forward_pe: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
    /// Empty or malformed ticker
    Invalid,
}
