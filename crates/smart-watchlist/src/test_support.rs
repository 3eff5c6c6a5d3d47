//! In-memory fakes shared by the engine's tests.

use analysis_core::{
    DataError, DerivedMetricRecord, FinancialSeriesProvider, GrowthEstimate,
    GrowthEstimateProvider, MetricKind, MetricOutcome, MetricStore, PriceQuote,
    QuarterlyFinancialSeries, QuoteProvider, ShortInterest, ShortInterestProvider, StoreError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::dispatcher::MetricComputation;

#[derive(Default)]
pub struct MemoryMetricStore {
    records: Mutex<HashMap<(String, MetricKind), DerivedMetricRecord>>,
    fail_writes: bool,
}

impl MemoryMetricStore {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub fn insert(&self, record: DerivedMetricRecord) {
        self.records
            .lock()
            .unwrap()
            .insert((record.ticker.clone(), record.kind), record);
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn upsert(&self, record: &DerivedMetricRecord) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Database("disk full".to_string()));
        }
        self.insert(record.clone());
        Ok(())
    }

    async fn get(
        &self,
        ticker: &str,
        kind: MetricKind,
    ) -> Result<Option<DerivedMetricRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(ticker.to_string(), kind))
            .cloned())
    }

    async fn get_all_for_ticker(
        &self,
        ticker: &str,
    ) -> Result<Vec<DerivedMetricRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.ticker == ticker)
            .cloned()
            .collect())
    }

    async fn delete_for_ticker(&self, ticker: &str) -> Result<u64, StoreError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|(t, _), _| t != ticker);
        Ok((before - records.len()) as u64)
    }
}

enum Script {
    Return(MetricOutcome),
    Panic,
}

/// Counts calls, optionally holding every call until `release`.
pub struct ScriptedComputation {
    script: Script,
    hold: bool,
    released: AtomicBool,
    gate: Notify,
    calls: AtomicUsize,
}

impl ScriptedComputation {
    fn new(script: Script, hold: bool) -> Self {
        Self {
            script,
            hold,
            released: AtomicBool::new(false),
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(outcome: MetricOutcome) -> Self {
        Self::new(Script::Return(outcome), false)
    }

    pub fn blocking(outcome: MetricOutcome) -> Self {
        Self::new(Script::Return(outcome), true)
    }

    pub fn panicking() -> Self {
        Self::new(Script::Panic, false)
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricComputation for ScriptedComputation {
    async fn compute(&self, _ticker: &str, _kind: MetricKind) -> MetricOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.hold {
            loop {
                let notified = self.gate.notified();
                if self.released.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
        }

        match &self.script {
            Script::Return(outcome) => outcome.clone(),
            Script::Panic => panic!("scripted computation failure"),
        }
    }
}

/// Canned responses for every provider trait, with a call counter each.
pub struct FakeProviders {
    pub series: Result<QuarterlyFinancialSeries, DataError>,
    pub quote: Result<PriceQuote, DataError>,
    pub growth: Result<GrowthEstimate, DataError>,
    pub short_interest: Result<ShortInterest, DataError>,
    pub series_calls: AtomicUsize,
    pub quote_calls: AtomicUsize,
}

impl FakeProviders {
    pub fn new(series: Result<QuarterlyFinancialSeries, DataError>) -> Self {
        Self {
            series,
            quote: Err(DataError::ApiKeyMissing("POLYGON_API_KEY".to_string())),
            growth: Err(DataError::NotFound("no estimates".to_string())),
            short_interest: Err(DataError::NotFound("no short data".to_string())),
            series_calls: AtomicUsize::new(0),
            quote_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FinancialSeriesProvider for FakeProviders {
    async fn quarterly_series(&self, _ticker: &str) -> Result<QuarterlyFinancialSeries, DataError> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        self.series.clone()
    }
}

#[async_trait]
impl QuoteProvider for FakeProviders {
    async fn current_quote(&self, _ticker: &str) -> Result<PriceQuote, DataError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.quote.clone()
    }
}

#[async_trait]
impl GrowthEstimateProvider for FakeProviders {
    async fn growth_estimates(&self, _ticker: &str) -> Result<GrowthEstimate, DataError> {
        self.growth.clone()
    }
}

#[async_trait]
impl ShortInterestProvider for FakeProviders {
    async fn short_interest(&self, _ticker: &str) -> Result<ShortInterest, DataError> {
        self.short_interest.clone()
    }
}

/// Twenty quarters matching the reference scenario: OI 100, D&A 10,
/// capex 20, tax 20 on pretax 100, EV 4000, market cap 3000.
pub fn reference_series(ticker: &str) -> QuarterlyFinancialSeries {
    let n = 20;
    QuarterlyFinancialSeries {
        ticker: ticker.to_string(),
        operating_income: vec![Some(100.0); n],
        depreciation_amortization: vec![Some(10.0); n],
        capex: vec![Some(20.0); n],
        income_tax: vec![Some(20.0); n],
        pretax_income: vec![Some(100.0); n],
        enterprise_value: vec![Some(4000.0); n],
        market_cap: vec![Some(3000.0); n],
        shares_diluted: vec![Some(100.0); n],
        periods: (0..n).map(|i| format!("Q{}", i)).collect(),
    }
}
