use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-ticker quarterly financial arrays, oldest quarter first.
///
/// Sequences may differ in length; an index past the end of a sequence, or
/// a `None` entry, means "no data" for that quarter (never zero).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarterlyFinancialSeries {
    pub ticker: String,
    #[serde(default)]
    pub operating_income: Vec<Option<f64>>,
    #[serde(default)]
    pub depreciation_amortization: Vec<Option<f64>>,
    #[serde(default)]
    pub capex: Vec<Option<f64>>,
    #[serde(default)]
    pub income_tax: Vec<Option<f64>>,
    #[serde(default)]
    pub pretax_income: Vec<Option<f64>>,
    #[serde(default)]
    pub enterprise_value: Vec<Option<f64>>,
    #[serde(default)]
    pub market_cap: Vec<Option<f64>>,
    #[serde(default)]
    pub shares_diluted: Vec<Option<f64>>,
    #[serde(default)]
    pub periods: Vec<String>,
}

impl QuarterlyFinancialSeries {
    /// Value of `sequence` at `index`, `None` when absent or out of range.
    pub fn value_at(sequence: &[Option<f64>], index: usize) -> Option<f64> {
        sequence.get(index).copied().flatten()
    }

    /// Number of quarters, measured on the operating-income sequence.
    pub fn len(&self) -> usize {
        self.operating_income.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operating_income.iter().all(Option::is_none)
    }

    pub fn period_at(&self, index: usize) -> Option<&str> {
        self.periods.get(index).map(String::as_str)
    }
}

/// Current market quote used to reconcile a stale enterprise value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub shares_diluted: Option<f64>,
}

/// The derived metrics tracked per watched ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    AdjustedPe,
    Growth,
    ShortInterest,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::AdjustedPe,
        MetricKind::Growth,
        MetricKind::ShortInterest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::AdjustedPe => "adjusted_pe",
            MetricKind::Growth => "growth",
            MetricKind::ShortInterest => "short_interest",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adjusted_pe" => Ok(MetricKind::AdjustedPe),
            "growth" => Ok(MetricKind::Growth),
            "short_interest" => Ok(MetricKind::ShortInterest),
            other => Err(format!("unknown metric kind: {other}")),
        }
    }
}

/// Outcome of the last computation attempt for a (ticker, metric) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Success,
    NoData,
    InsufficientHistory,
    CalculationFailed,
    Error,
    ApiKeyMissing,
    Pending,
}

impl MetricStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Success => "success",
            MetricStatus::NoData => "no_data",
            MetricStatus::InsufficientHistory => "insufficient_history",
            MetricStatus::CalculationFailed => "calculation_failed",
            MetricStatus::Error => "error",
            MetricStatus::ApiKeyMissing => "api_key_missing",
            MetricStatus::Pending => "pending",
        }
    }

    /// Retrying will not help until the source data changes.
    pub fn is_permanent_failure(&self) -> bool {
        match self {
            MetricStatus::NoData | MetricStatus::InsufficientHistory | MetricStatus::CalculationFailed => true,
            MetricStatus::Success | MetricStatus::Error | MetricStatus::ApiKeyMissing | MetricStatus::Pending => false,
        }
    }

    /// May succeed after a cooldown (network, rate limit, misconfiguration).
    pub fn is_transient_failure(&self) -> bool {
        match self {
            MetricStatus::Error | MetricStatus::ApiKeyMissing => true,
            MetricStatus::Success
            | MetricStatus::NoData
            | MetricStatus::InsufficientHistory
            | MetricStatus::CalculationFailed
            | MetricStatus::Pending => false,
        }
    }
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(MetricStatus::Success),
            "no_data" => Ok(MetricStatus::NoData),
            // Older rows used this name for the same condition
            "insufficient_history" | "no_quarterly_data" => Ok(MetricStatus::InsufficientHistory),
            "calculation_failed" => Ok(MetricStatus::CalculationFailed),
            "error" => Ok(MetricStatus::Error),
            "api_key_missing" => Ok(MetricStatus::ApiKeyMissing),
            "pending" => Ok(MetricStatus::Pending),
            other => Err(format!("unknown metric status: {other}")),
        }
    }
}

/// Every intermediate of the adjusted P/E computation.
///
/// Persisted as-is; the forward P/E derivation reads `adjusted_oi_after_tax`
/// and `updated_ev`, not just the ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedPeBreakdown {
    pub adjusted_pe_ratio: f64,
    pub ttm_operating_income: f64,
    pub ttm_da: f64,
    pub ttm_capex: f64,
    pub adjustment: f64,
    pub adjusted_operating_income: f64,
    pub median_tax_rate: f64,
    /// The configured default rate was used because no quarter had a valid rate
    pub tax_rate_defaulted: bool,
    pub tax_quarters_used: usize,
    pub adjusted_oi_after_tax: f64,
    pub stored_ev: f64,
    pub stored_market_cap: Option<f64>,
    pub updated_ev: f64,
    pub updated_market_cap: Option<f64>,
    pub ev_difference: Option<f64>,
    pub share_count: Option<f64>,
    pub current_price: Option<f64>,
    pub ev_reconciled: bool,
    pub as_of_period: Option<String>,
}

/// Analyst revenue-growth estimates, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthEstimate {
    pub current_year_growth: Option<f64>,
    pub next_year_growth: Option<f64>,
}

impl GrowthEstimate {
    pub fn is_complete(&self) -> bool {
        self.current_year_growth.is_some() && self.next_year_growth.is_some()
    }
}

/// Short interest as percent of float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShortInterest {
    pub short_float: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    AdjustedPe(AdjustedPeBreakdown),
    Growth(GrowthEstimate),
    ShortInterest(ShortInterest),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::AdjustedPe(_) => MetricKind::AdjustedPe,
            MetricValue::Growth(_) => MetricKind::Growth,
            MetricValue::ShortInterest(_) => MetricKind::ShortInterest,
        }
    }

    /// Single number stored alongside the payload for ad hoc queries.
    pub fn headline(&self) -> Option<f64> {
        match self {
            MetricValue::AdjustedPe(b) => Some(b.adjusted_pe_ratio),
            MetricValue::Growth(g) => g.current_year_growth,
            MetricValue::ShortInterest(s) => Some(s.short_float),
        }
    }

    /// Whether the view can display this value without a recompute.
    pub fn is_usable(&self) -> bool {
        match self {
            MetricValue::Growth(g) => g.is_complete(),
            MetricValue::AdjustedPe(b) => b.adjusted_pe_ratio.is_finite(),
            MetricValue::ShortInterest(s) => s.short_float.is_finite(),
        }
    }
}

/// Result of one computation attempt, before it is stamped and persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutcome {
    Computed(MetricValue),
    Failed(MetricStatus),
}

/// Latest persisted state for one (ticker, metric) pair. Updated in place on
/// every attempt; no history is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricRecord {
    pub ticker: String,
    pub kind: MetricKind,
    pub status: MetricStatus,
    pub value: Option<MetricValue>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl DerivedMetricRecord {
    pub fn success(ticker: impl Into<String>, value: MetricValue, at: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.into(),
            kind: value.kind(),
            status: MetricStatus::Success,
            value: Some(value),
            last_updated: Some(at),
        }
    }

    /// A record with no value. `Success` without a value cannot be
    /// represented, so it is stored as `Error`.
    pub fn failure(
        ticker: impl Into<String>,
        kind: MetricKind,
        status: MetricStatus,
        at: DateTime<Utc>,
    ) -> Self {
        let status = if status == MetricStatus::Success {
            MetricStatus::Error
        } else {
            status
        };
        Self {
            ticker: ticker.into(),
            kind,
            status,
            value: None,
            last_updated: Some(at),
        }
    }

    pub fn from_outcome(
        ticker: impl Into<String>,
        kind: MetricKind,
        outcome: MetricOutcome,
        at: DateTime<Utc>,
    ) -> Self {
        match outcome {
            MetricOutcome::Computed(value) if value.kind() == kind => Self::success(ticker, value, at),
            MetricOutcome::Computed(_) => Self::failure(ticker, kind, MetricStatus::Error, at),
            MetricOutcome::Failed(status) => Self::failure(ticker, kind, status, at),
        }
    }

    /// The value, if it is present and complete enough to display.
    pub fn usable_value(&self) -> Option<&MetricValue> {
        self.value.as_ref().filter(|v| v.is_usable())
    }

    pub fn adjusted_pe(&self) -> Option<&AdjustedPeBreakdown> {
        match self.usable_value() {
            Some(MetricValue::AdjustedPe(b)) => Some(b),
            _ => None,
        }
    }

    pub fn growth(&self) -> Option<&GrowthEstimate> {
        match self.value.as_ref() {
            Some(MetricValue::Growth(g)) => Some(g),
            _ => None,
        }
    }

    pub fn short_interest(&self) -> Option<&ShortInterest> {
        match self.usable_value() {
            Some(MetricValue::ShortInterest(s)) => Some(s),
            _ => None,
        }
    }
}
