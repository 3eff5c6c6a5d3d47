use async_trait::async_trait;

use crate::{
    DataError, DerivedMetricRecord, GrowthEstimate, MetricKind, PriceQuote,
    QuarterlyFinancialSeries, ShortInterest, StoreError,
};

/// Source of raw quarterly financial arrays.
///
/// `DataError::NotFound` means the ticker has no financial history;
/// `DataError::ApiKeyMissing` means the source is not configured.
#[async_trait]
pub trait FinancialSeriesProvider: Send + Sync {
    async fn quarterly_series(&self, ticker: &str) -> Result<QuarterlyFinancialSeries, DataError>;
}

/// Current price and diluted share count, used only for EV reconciliation.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn current_quote(&self, ticker: &str) -> Result<PriceQuote, DataError>;
}

#[async_trait]
pub trait GrowthEstimateProvider: Send + Sync {
    async fn growth_estimates(&self, ticker: &str) -> Result<GrowthEstimate, DataError>;
}

#[async_trait]
pub trait ShortInterestProvider: Send + Sync {
    async fn short_interest(&self, ticker: &str) -> Result<ShortInterest, DataError>;
}

/// Keyed upsert/read of the latest record per (ticker, metric kind).
/// Writers to distinct keys must not interfere with each other.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn upsert(&self, record: &DerivedMetricRecord) -> Result<(), StoreError>;

    async fn get(&self, ticker: &str, kind: MetricKind) -> Result<Option<DerivedMetricRecord>, StoreError>;

    /// Every stored record for the ticker, one per kind at most.
    async fn get_all_for_ticker(&self, ticker: &str) -> Result<Vec<DerivedMetricRecord>, StoreError>;

    /// Returns the number of records removed.
    async fn delete_for_ticker(&self, ticker: &str) -> Result<u64, StoreError>;
}
