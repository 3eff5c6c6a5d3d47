use analysis_core::{
    FinancialSeriesProvider, GrowthEstimateProvider, MetricKind, MetricOutcome, MetricStatus,
    MetricValue, QuoteProvider, ShortInterestProvider,
};
use async_trait::async_trait;
use fundamental_analysis::{adjusted_pe, reconcile_enterprise_value, AdjustedEarningsCalculator};
use std::sync::Arc;

use crate::dispatcher::MetricComputation;

/// The real computation for each metric kind, backed by the data providers.
pub struct MetricComputer {
    series: Arc<dyn FinancialSeriesProvider>,
    quotes: Arc<dyn QuoteProvider>,
    growth: Arc<dyn GrowthEstimateProvider>,
    short_interest: Arc<dyn ShortInterestProvider>,
    calculator: AdjustedEarningsCalculator,
}

impl MetricComputer {
    pub fn new(
        series: Arc<dyn FinancialSeriesProvider>,
        quotes: Arc<dyn QuoteProvider>,
        growth: Arc<dyn GrowthEstimateProvider>,
        short_interest: Arc<dyn ShortInterestProvider>,
        calculator: AdjustedEarningsCalculator,
    ) -> Self {
        Self {
            series,
            quotes,
            growth,
            short_interest,
            calculator,
        }
    }

    async fn compute_adjusted_pe(&self, ticker: &str) -> MetricOutcome {
        let series = match self.series.quarterly_series(ticker).await {
            Ok(series) => series,
            Err(e) => {
                tracing::warn!("Quarterly data unavailable for {}: {}", ticker, e);
                return MetricOutcome::Failed(e.status());
            }
        };

        let earnings = match self.calculator.calculate(&series) {
            Ok(earnings) => earnings,
            Err(e) => {
                tracing::info!("Adjusted earnings undefined for {}: {}", ticker, e);
                return MetricOutcome::Failed(e.status());
            }
        };

        // Quote failures fall back to the stored EV
        let quote = match self.quotes.current_quote(ticker).await {
            Ok(quote) => Some(quote),
            Err(e) => {
                tracing::warn!("No current quote for {}, using stored EV: {}", ticker, e);
                None
            }
        };

        let ev = reconcile_enterprise_value(
            earnings.stored_ev,
            earnings.stored_market_cap,
            quote.as_ref(),
            earnings.series_share_count,
        );

        match adjusted_pe(&earnings, &ev) {
            Ok(breakdown) => MetricOutcome::Computed(MetricValue::AdjustedPe(breakdown)),
            Err(e) => {
                tracing::info!("Adjusted P/E undefined for {}: {}", ticker, e);
                MetricOutcome::Failed(e.status())
            }
        }
    }

    async fn compute_growth(&self, ticker: &str) -> MetricOutcome {
        match self.growth.growth_estimates(ticker).await {
            Ok(estimate) if estimate.is_complete() => {
                MetricOutcome::Computed(MetricValue::Growth(estimate))
            }
            Ok(_) => MetricOutcome::Failed(MetricStatus::NoData),
            Err(e) => {
                tracing::warn!("Growth estimates unavailable for {}: {}", ticker, e);
                MetricOutcome::Failed(e.status())
            }
        }
    }

    async fn compute_short_interest(&self, ticker: &str) -> MetricOutcome {
        match self.short_interest.short_interest(ticker).await {
            Ok(short) if short.short_float.is_finite() => {
                MetricOutcome::Computed(MetricValue::ShortInterest(short))
            }
            Ok(_) => MetricOutcome::Failed(MetricStatus::Error),
            Err(e) => {
                tracing::warn!("Short interest unavailable for {}: {}", ticker, e);
                MetricOutcome::Failed(e.status())
            }
        }
    }
}

#[async_trait]
impl MetricComputation for MetricComputer {
    async fn compute(&self, ticker: &str, kind: MetricKind) -> MetricOutcome {
        match kind {
            MetricKind::AdjustedPe => self.compute_adjusted_pe(ticker).await,
            MetricKind::Growth => self.compute_growth(ticker).await,
            MetricKind::ShortInterest => self.compute_short_interest(ticker).await,
        }
    }
}
