use analysis_core::{DerivedMetricRecord, MetricKind};
use anyhow::Result;
use chrono::{DateTime, Utc};
use fundamental_analysis::{two_year_annualized_growth, two_year_forward_pe};

use crate::db::WatchlistDb;
use crate::dispatcher::MetricDispatcher;
use crate::models::{AddOutcome, MetricView, WatchlistEntry, WatchlistItem};
use crate::staleness::StalenessPolicy;

const MAX_TICKER_LEN: usize = 16;

/// Trimmed, upper-cased ticker, or `None` if it cannot be a symbol.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let ticker = raw.trim().to_uppercase();
    let valid = !ticker.is_empty()
        && ticker.len() <= MAX_TICKER_LEN
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'));
    valid.then_some(ticker)
}

/// Watchlist operations and the aggregation view. Reading the view never
/// waits on a computation; missing or stale metrics are handed to the
/// dispatcher and reported as loading.
#[derive(Clone)]
pub struct WatchlistService {
    db: WatchlistDb,
    dispatcher: MetricDispatcher,
    policy: StalenessPolicy,
}

impl WatchlistService {
    pub fn new(db: WatchlistDb, dispatcher: MetricDispatcher, policy: StalenessPolicy) -> Self {
        Self {
            db,
            dispatcher,
            policy,
        }
    }

    pub fn dispatcher(&self) -> &MetricDispatcher {
        &self.dispatcher
    }

    /// Every watched ticker, newest first, with metrics resolved.
    pub async fn get_watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let items = self.db.list().await?;
        let mut entries = Vec::with_capacity(items.len());

        for item in items {
            entries.push(self.build_entry(item).await);
        }

        Ok(entries)
    }

    async fn build_entry(&self, item: WatchlistItem) -> WatchlistEntry {
        let ticker = item.ticker.as_str();
        let now = Utc::now();

        let records = match self.dispatcher.store().get_all_for_ticker(ticker).await {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!("Could not read metrics for {}: {}", ticker, e);
                None
            }
        };
        let records = records.as_deref();

        let adjusted_pe = self.resolve(ticker, MetricKind::AdjustedPe, records, now, |r| {
            r.adjusted_pe().cloned()
        });
        let growth = self.resolve(ticker, MetricKind::Growth, records, now, |r| {
            r.growth().filter(|g| g.is_complete()).copied()
        });
        let short_interest = self.resolve(ticker, MetricKind::ShortInterest, records, now, |r| {
            r.short_interest().copied()
        });

        let two_year_growth = growth.value.and_then(|g| {
            two_year_annualized_growth(g.current_year_growth?, g.next_year_growth?)
        });
        let two_year_forward_pe = two_year_forward_pe(
            adjusted_pe.value.as_ref().map(|b| b.updated_ev),
            adjusted_pe.value.as_ref().map(|b| b.adjusted_oi_after_tax),
            two_year_growth,
        );

        WatchlistEntry {
            ticker: item.ticker,
            company_name: item.company_name,
            added_at: item.added_at,
            adjusted_pe,
            growth,
            short_interest,
            two_year_growth,
            two_year_forward_pe,
        }
    }

    /// `records` is `None` when the store could not be read; such metrics
    /// are shown as unavailable and nothing is triggered.
    fn resolve<T>(
        &self,
        ticker: &str,
        kind: MetricKind,
        records: Option<&[DerivedMetricRecord]>,
        now: DateTime<Utc>,
        extract: impl Fn(&DerivedMetricRecord) -> Option<T>,
    ) -> MetricView<T> {
        let Some(records) = records else {
            return MetricView::resolved(None, None);
        };
        let record = records.iter().find(|r| r.kind == kind);

        if let Some(value) = record.and_then(&extract) {
            return MetricView::resolved(record, Some(value));
        }

        if self.dispatcher.is_in_flight(ticker, kind) {
            return MetricView::loading(record);
        }

        let eligibility = self.policy.evaluate(kind, record, now);
        if eligibility.should_refresh() {
            self.dispatcher.trigger(ticker, kind);
            return MetricView::loading(record);
        }

        tracing::debug!("Not refreshing {} for {}: {:?}", kind, ticker, eligibility);
        MetricView::resolved(record, None)
    }

    /// Adds the ticker and starts all metric computations for it.
    pub async fn add_to_watchlist(
        &self,
        ticker: &str,
        company_name: Option<&str>,
    ) -> Result<AddOutcome> {
        let Some(ticker) = normalize_ticker(ticker) else {
            return Ok(AddOutcome::Invalid);
        };

        let company_name = company_name.map(str::trim).filter(|n| !n.is_empty());
        if !self.db.add_ticker(&ticker, company_name).await? {
            return Ok(AddOutcome::AlreadyPresent);
        }

        tracing::info!("Added {} to watchlist", ticker);
        for kind in MetricKind::ALL {
            self.dispatcher.trigger(&ticker, kind);
        }

        Ok(AddOutcome::Added)
    }

    /// Removes the ticker and its stored metrics. Computations still running
    /// for it finish, but their results are not stored.
    pub async fn remove_from_watchlist(&self, ticker: &str) -> Result<bool> {
        let Some(ticker) = normalize_ticker(ticker) else {
            return Ok(false);
        };

        // Unwatch first so no late write can land after the delete below
        let removed = self.db.remove_ticker(&ticker).await?;
        let deleted = self.dispatcher.store().delete_for_ticker(&ticker).await?;
        if removed {
            tracing::info!("Removed {} from watchlist ({} metric rows)", ticker, deleted);
        }
        Ok(removed)
    }

    pub async fn is_in_watchlist(&self, ticker: &str) -> Result<bool> {
        match normalize_ticker(ticker) {
            Some(ticker) => self.db.is_in_watchlist(&ticker).await,
            None => Ok(false),
        }
    }

    pub async fn watchlist_tickers(&self) -> Result<Vec<String>> {
        self.db.tickers().await
    }

    pub async fn watchlist_count(&self) -> Result<i64> {
        self.db.count().await
    }

    /// Triggers every eligible (ticker, kind) pair on the watchlist.
    /// Returns how many computations were started.
    pub async fn refresh_missing(&self) -> Result<usize> {
        let now = Utc::now();
        let mut started = 0;

        for ticker in self.db.tickers().await? {
            let records = match self.dispatcher.store().get_all_for_ticker(&ticker).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!("Could not read metrics for {}: {}", ticker, e);
                    continue;
                }
            };

            for kind in MetricKind::ALL {
                if self.dispatcher.is_in_flight(&ticker, kind) {
                    continue;
                }

                let record = records.iter().find(|r| r.kind == kind);
                if self.policy.evaluate(kind, record, now).should_refresh()
                    && self.dispatcher.trigger(&ticker, kind).is_started()
                {
                    started += 1;
                }
            }
        }

        tracing::info!("Refresh started {} computations", started);
        Ok(started)
    }

    /// Stored adjusted P/E record with its full breakdown.
    pub async fn adjusted_pe_breakdown(&self, ticker: &str) -> Result<Option<DerivedMetricRecord>> {
        let Some(ticker) = normalize_ticker(ticker) else {
            return Ok(None);
        };
        Ok(self
            .dispatcher
            .store()
            .get(&ticker, MetricKind::AdjustedPe)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric_store::SqliteMetricStore;
    use crate::staleness::RetryPolicy;
    use crate::test_support::ScriptedComputation;
    use analysis_core::{
        AdjustedPeBreakdown, GrowthEstimate, MetricOutcome, MetricStatus, MetricStore,
        MetricValue, ShortInterest,
    };
    use approx::assert_relative_eq;
    use chrono::Duration;
    use std::sync::Arc;

    struct Harness {
        service: WatchlistService,
        db: WatchlistDb,
        store: Arc<SqliteMetricStore>,
        computer: Arc<ScriptedComputation>,
    }

    async fn harness(computer: ScriptedComputation) -> Harness {
        let db = WatchlistDb::new("sqlite::memory:").await.unwrap();
        let store = Arc::new(SqliteMetricStore::new(db.pool().clone()));
        let computer = Arc::new(computer);
        let dispatcher = MetricDispatcher::new(store.clone(), computer.clone());
        let policy = StalenessPolicy {
            growth: RetryPolicy::from_secs(3600),
            ..Default::default()
        };
        Harness {
            service: WatchlistService::new(db.clone(), dispatcher, policy),
            db,
            store,
            computer,
        }
    }

    async fn settle(service: &WatchlistService) {
        for _ in 0..200 {
            if service.dispatcher().in_flight_count() == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("computations did not finish");
    }

    fn breakdown(updated_ev: f64, after_tax: f64) -> AdjustedPeBreakdown {
        AdjustedPeBreakdown {
            adjusted_pe_ratio: updated_ev / after_tax,
            ttm_operating_income: 400.0,
            ttm_da: 40.0,
            ttm_capex: 80.0,
            adjustment: 0.0,
            adjusted_operating_income: 400.0,
            median_tax_rate: 0.2,
            tax_rate_defaulted: false,
            tax_quarters_used: 20,
            adjusted_oi_after_tax: after_tax,
            stored_ev: 4000.0,
            stored_market_cap: Some(3000.0),
            updated_ev,
            updated_market_cap: Some(4000.0),
            ev_difference: Some(1000.0),
            share_count: Some(200.0),
            current_price: Some(20.0),
            ev_reconciled: true,
            as_of_period: Some("2024-03-31".to_string()),
        }
    }

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker(" aapl "), Some("AAPL".to_string()));
        assert_eq!(normalize_ticker("brk.b"), Some("BRK.B".to_string()));
        assert_eq!(normalize_ticker("   "), None);
        assert_eq!(normalize_ticker("AA PL"), None);
        assert_eq!(normalize_ticker("DROP;TABLE"), None);
    }

    #[tokio::test]
    async fn test_add_triggers_every_metric() {
        let h = harness(ScriptedComputation::returning(MetricOutcome::Failed(
            MetricStatus::NoData,
        )))
        .await;

        let outcome = h.service.add_to_watchlist(" aapl ", Some("Apple Inc.")).await.unwrap();
        assert_eq!(outcome, AddOutcome::Added);
        settle(&h.service).await;
        assert_eq!(h.computer.calls(), 3);

        for kind in MetricKind::ALL {
            let record = h.store.get("AAPL", kind).await.unwrap().unwrap();
            assert_eq!(record.status, MetricStatus::NoData);
        }

        assert_eq!(
            h.service.add_to_watchlist("AAPL", None).await.unwrap(),
            AddOutcome::AlreadyPresent
        );
        assert_eq!(h.service.add_to_watchlist("", None).await.unwrap(), AddOutcome::Invalid);
        assert_eq!(h.computer.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried_by_the_view() {
        let h = harness(ScriptedComputation::returning(MetricOutcome::Failed(
            MetricStatus::NoData,
        )))
        .await;
        h.service.add_to_watchlist("GONE", None).await.unwrap();
        settle(&h.service).await;

        for _ in 0..3 {
            let view = h.service.get_watchlist().await.unwrap();
            let entry = &view[0];
            assert!(!entry.adjusted_pe.loading);
            assert!(entry.adjusted_pe.value.is_none());
            assert_eq!(entry.short_interest.status, Some(MetricStatus::NoData));
            assert!(entry.two_year_forward_pe.is_none());
        }
        assert_eq!(h.computer.calls(), 3);
    }

    #[tokio::test]
    async fn test_view_reports_loading_without_duplicate_work() {
        let h = harness(ScriptedComputation::blocking(MetricOutcome::Computed(
            MetricValue::ShortInterest(ShortInterest { short_float: 4.0 }),
        )))
        .await;
        h.db.add_ticker("AAPL", None).await.unwrap();

        let first = h.service.get_watchlist().await.unwrap();
        let second = h.service.get_watchlist().await.unwrap();
        for view in [&first, &second] {
            assert!(view[0].adjusted_pe.loading);
            assert!(view[0].growth.loading);
            assert!(view[0].short_interest.loading);
        }
        assert_eq!(h.service.dispatcher().in_flight_count(), 3);

        h.computer.release();
        settle(&h.service).await;
        assert_eq!(h.computer.calls(), 3);
    }

    #[tokio::test]
    async fn test_composite_fields() {
        let h = harness(ScriptedComputation::returning(MetricOutcome::Failed(
            MetricStatus::Error,
        )))
        .await;
        h.db.add_ticker("MSFT", Some("Microsoft")).await.unwrap();

        let now = Utc::now();
        for value in [
            MetricValue::AdjustedPe(breakdown(5000.0, 320.0)),
            MetricValue::Growth(GrowthEstimate {
                current_year_growth: Some(10.0),
                next_year_growth: Some(10.0),
            }),
            MetricValue::ShortInterest(ShortInterest { short_float: 0.9 }),
        ] {
            h.store.upsert(&DerivedMetricRecord::success("MSFT", value, now)).await.unwrap();
        }

        let view = h.service.get_watchlist().await.unwrap();
        let entry = &view[0];
        assert_eq!(entry.company_name.as_deref(), Some("Microsoft"));
        assert_relative_eq!(entry.adjusted_pe.value.as_ref().unwrap().adjusted_pe_ratio, 15.625);
        assert_relative_eq!(entry.two_year_growth.unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(
            entry.two_year_forward_pe.unwrap(),
            5000.0 / (320.0 * 1.21),
            epsilon = 1e-9
        );
        assert!(!entry.short_interest.loading);
        assert_eq!(h.computer.calls(), 0);
    }

    #[tokio::test]
    async fn test_incomplete_growth_leaves_composites_empty() {
        let h = harness(ScriptedComputation::returning(MetricOutcome::Failed(
            MetricStatus::NoData,
        )))
        .await;
        h.db.add_ticker("NVDA", None).await.unwrap();
        h.store
            .upsert(&DerivedMetricRecord::success(
                "NVDA",
                MetricValue::AdjustedPe(breakdown(5000.0, 320.0)),
                Utc::now(),
            ))
            .await
            .unwrap();
        h.store
            .upsert(&DerivedMetricRecord::failure(
                "NVDA",
                MetricKind::Growth,
                MetricStatus::NoData,
                Utc::now(),
            ))
            .await
            .unwrap();

        let view = h.service.get_watchlist().await.unwrap();
        assert!(view[0].adjusted_pe.value.is_some());
        assert!(view[0].two_year_growth.is_none());
        assert!(view[0].two_year_forward_pe.is_none());
        assert!(!view[0].growth.loading);
    }

    #[tokio::test]
    async fn test_transient_failure_waits_for_cooldown() {
        let h = harness(ScriptedComputation::returning(MetricOutcome::Failed(
            MetricStatus::Error,
        )))
        .await;
        h.db.add_ticker("AMD", None).await.unwrap();
        h.db.add_ticker("INTC", None).await.unwrap();

        let recent = Utc::now() - Duration::minutes(5);
        let old = Utc::now() - Duration::hours(2);
        for (ticker, at) in [("AMD", recent), ("INTC", old)] {
            for kind in MetricKind::ALL {
                h.store
                    .upsert(&DerivedMetricRecord::failure(ticker, kind, MetricStatus::Error, at))
                    .await
                    .unwrap();
            }
        }

        let started = h.service.refresh_missing().await.unwrap();
        assert_eq!(started, 3);
        assert!(!h.service.dispatcher().is_in_flight("AMD", MetricKind::Growth));
        settle(&h.service).await;

        let record = h.store.get("INTC", MetricKind::Growth).await.unwrap().unwrap();
        assert!(record.last_updated.unwrap() > old);
        let record = h.store.get("AMD", MetricKind::Growth).await.unwrap().unwrap();
        assert_eq!(
            record.last_updated.map(|ts| ts.timestamp_micros()),
            Some(recent.timestamp_micros())
        );
    }

    #[tokio::test]
    async fn test_remove_during_computation_leaves_no_rows() {
        let h = harness(ScriptedComputation::blocking(MetricOutcome::Failed(
            MetricStatus::NoData,
        )))
        .await;
        h.service.add_to_watchlist("AAPL", None).await.unwrap();
        assert_eq!(h.service.dispatcher().in_flight_count(), 3);

        assert!(h.service.remove_from_watchlist("AAPL").await.unwrap());
        h.computer.release();
        settle(&h.service).await;

        assert_eq!(h.computer.calls(), 3);
        assert!(!h.service.is_in_watchlist("AAPL").await.unwrap());
        assert!(h.store.get_all_for_ticker("AAPL").await.unwrap().is_empty());

        // A re-add starts from scratch
        assert_eq!(
            h.service.add_to_watchlist("AAPL", None).await.unwrap(),
            AddOutcome::Added
        );
        settle(&h.service).await;
        assert_eq!(h.computer.calls(), 6);
        assert_eq!(h.store.get_all_for_ticker("AAPL").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_remove_clears_metrics() {
        let h = harness(ScriptedComputation::returning(MetricOutcome::Failed(
            MetricStatus::NoData,
        )))
        .await;
        h.service.add_to_watchlist("TSLA", None).await.unwrap();
        settle(&h.service).await;
        assert!(h.service.is_in_watchlist("tsla").await.unwrap());
        assert_eq!(h.service.watchlist_count().await.unwrap(), 1);

        assert!(h.service.remove_from_watchlist(" tsla").await.unwrap());
        assert!(!h.service.remove_from_watchlist("TSLA").await.unwrap());
        assert!(h.service.watchlist_tickers().await.unwrap().is_empty());
        assert!(h.service.adjusted_pe_breakdown("TSLA").await.unwrap().is_none());
        assert!(h.store.get_all_for_ticker("TSLA").await.unwrap().is_empty());
    }
}
