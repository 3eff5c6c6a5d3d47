use analysis_core::{AdjustedPeBreakdown, CalculationError, PriceQuote, QuarterlyFinancialSeries};
use statrs::statistics::{Data, Median};

/// Fallback when no quarter yields a usable effective tax rate (US federal
/// corporate rate).
pub const DEFAULT_TAX_RATE: f64 = 0.21;

const TTM_QUARTERS: usize = 4;
const TAX_WINDOW_QUARTERS: usize = 20;

/// Tax-normalized earnings at the most recent usable quarter, before the
/// enterprise value is refreshed to today's price.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedEarnings {
    /// Quarter index the calculation was evaluated at
    pub index: usize,
    pub ttm_operating_income: f64,
    pub ttm_da: f64,
    pub ttm_capex: f64,
    pub adjustment: f64,
    pub adjusted_operating_income: f64,
    pub median_tax_rate: f64,
    pub tax_rate_defaulted: bool,
    pub tax_quarters_used: usize,
    pub adjusted_oi_after_tax: f64,
    pub stored_ev: f64,
    pub stored_market_cap: Option<f64>,
    /// Latest diluted share count at or before `index`
    pub series_share_count: Option<f64>,
    pub as_of_period: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvReconciliation {
    pub updated_ev: f64,
    pub updated_market_cap: Option<f64>,
    pub ev_difference: Option<f64>,
    pub share_count: Option<f64>,
    pub current_price: Option<f64>,
    pub reconciled: bool,
}

pub struct AdjustedEarningsCalculator {
    default_tax_rate: f64,
}

impl Default for AdjustedEarningsCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_TAX_RATE)
    }
}

impl AdjustedEarningsCalculator {
    pub fn new(default_tax_rate: f64) -> Self {
        Self {
            default_tax_rate: default_tax_rate.clamp(0.0, 1.0),
        }
    }

    pub fn default_tax_rate(&self) -> f64 {
        self.default_tax_rate
    }

    /// Evaluate at the most recent quarter with a known, non-zero enterprise
    /// value and four reported quarters of operating income, walking back
    /// through older quarters until one qualifies.
    pub fn calculate(
        &self,
        series: &QuarterlyFinancialSeries,
    ) -> Result<AdjustedEarnings, CalculationError> {
        if series.is_empty() {
            return Err(CalculationError::NoFinancialData);
        }

        let quarters = series.len();
        if quarters < TTM_QUARTERS {
            return Err(CalculationError::InsufficientHistory(format!(
                "{} quarters of operating income, need {}",
                quarters, TTM_QUARTERS
            )));
        }

        for j in (TTM_QUARTERS - 1..quarters).rev() {
            let stored_ev = match QuarterlyFinancialSeries::value_at(&series.enterprise_value, j) {
                Some(ev) if ev != 0.0 => ev,
                _ => continue,
            };

            let Some((ttm_oi, ttm_da, ttm_capex)) = trailing_twelve_months(series, j) else {
                continue;
            };

            let adjustment = depreciation_adjustment(ttm_da, ttm_capex);
            let adjusted_operating_income = ttm_oi + adjustment;

            let (median_tax_rate, tax_quarters_used) = match median_tax_rate(series, j) {
                Some((rate, used)) => (rate, used),
                None => (self.default_tax_rate, 0),
            };

            return Ok(AdjustedEarnings {
                index: j,
                ttm_operating_income: ttm_oi,
                ttm_da,
                ttm_capex,
                adjustment,
                adjusted_operating_income,
                median_tax_rate,
                tax_rate_defaulted: tax_quarters_used == 0,
                tax_quarters_used,
                adjusted_oi_after_tax: adjusted_operating_income * (1.0 - median_tax_rate),
                stored_ev,
                stored_market_cap: QuarterlyFinancialSeries::value_at(&series.market_cap, j),
                series_share_count: (0..=j)
                    .rev()
                    .find_map(|k| QuarterlyFinancialSeries::value_at(&series.shares_diluted, k)),
                as_of_period: series.period_at(j).map(str::to_string),
            });
        }

        Err(CalculationError::InsufficientHistory(
            "no quarter with enterprise value and four quarters of operating income".to_string(),
        ))
    }
}

/// Sums of operating income, D&A and capex over the four quarters ending at
/// `end`. `None` if any of those quarters lacks operating income; missing
/// D&A or capex quarters contribute nothing.
fn trailing_twelve_months(series: &QuarterlyFinancialSeries, end: usize) -> Option<(f64, f64, f64)> {
    let start = end + 1 - TTM_QUARTERS;
    let mut oi = 0.0;
    let mut da = 0.0;
    let mut capex = 0.0;

    for k in start..=end {
        oi += QuarterlyFinancialSeries::value_at(&series.operating_income, k)?;
        da += QuarterlyFinancialSeries::value_at(&series.depreciation_amortization, k).unwrap_or(0.0);
        capex += QuarterlyFinancialSeries::value_at(&series.capex, k).unwrap_or(0.0);
    }

    Some((oi, da, capex))
}

/// Amount added back to operating income when depreciation exceeds real
/// reinvestment. Zero whenever `|da| <= |capex|`.
pub fn depreciation_adjustment(ttm_da: f64, ttm_capex: f64) -> f64 {
    if ttm_da.abs() > ttm_capex.abs() {
        ttm_da - ttm_capex
    } else {
        0.0
    }
}

/// Median of per-quarter `|tax| / |pretax|` over the 20 quarters ending at
/// `end`, keeping only ratios in [0, 1]. Returns the rate and how many
/// quarters contributed, or `None` if none did.
fn median_tax_rate(series: &QuarterlyFinancialSeries, end: usize) -> Option<(f64, usize)> {
    let start = end.saturating_sub(TAX_WINDOW_QUARTERS - 1);

    let rates: Vec<f64> = (start..=end)
        .filter_map(|k| {
            let tax = QuarterlyFinancialSeries::value_at(&series.income_tax, k)?;
            let pretax = QuarterlyFinancialSeries::value_at(&series.pretax_income, k)?;
            if pretax == 0.0 {
                return None;
            }
            // Tax benefits are reported negative
            let rate = tax.abs() / pretax.abs();
            (0.0..=1.0).contains(&rate).then_some(rate)
        })
        .collect();

    if rates.is_empty() {
        return None;
    }

    let used = rates.len();
    Some((Data::new(rates).median(), used))
}

/// Refresh the vendor EV to the current price, holding the EV minus market
/// cap component (net debt, minorities, preferred) fixed since ingestion.
/// Falls back to the stored EV when price, share count or stored market cap
/// is unavailable.
pub fn reconcile_enterprise_value(
    stored_ev: f64,
    stored_market_cap: Option<f64>,
    quote: Option<&PriceQuote>,
    series_share_count: Option<f64>,
) -> EvReconciliation {
    let current_price = quote.map(|q| q.price).filter(|p| p.is_finite() && *p > 0.0);
    let share_count = quote
        .and_then(|q| q.shares_diluted)
        .or(series_share_count)
        .filter(|s| s.is_finite() && *s > 0.0);
    let ev_difference = stored_market_cap.map(|mc| stored_ev - mc);

    match (current_price, share_count, ev_difference) {
        (Some(price), Some(shares), Some(delta)) => {
            let updated_market_cap = price * shares;
            EvReconciliation {
                updated_ev: updated_market_cap + delta,
                updated_market_cap: Some(updated_market_cap),
                ev_difference: Some(delta),
                share_count: Some(shares),
                current_price: Some(price),
                reconciled: true,
            }
        }
        _ => EvReconciliation {
            updated_ev: stored_ev,
            updated_market_cap: None,
            ev_difference,
            share_count,
            current_price,
            reconciled: false,
        },
    }
}

/// Final ratio `reconciled EV / after-tax adjusted earnings` with every
/// intermediate retained.
pub fn adjusted_pe(
    earnings: &AdjustedEarnings,
    ev: &EvReconciliation,
) -> Result<AdjustedPeBreakdown, CalculationError> {
    if earnings.adjusted_oi_after_tax == 0.0 {
        return Err(CalculationError::ZeroAdjustedEarnings);
    }

    Ok(AdjustedPeBreakdown {
        adjusted_pe_ratio: ev.updated_ev / earnings.adjusted_oi_after_tax,
        ttm_operating_income: earnings.ttm_operating_income,
        ttm_da: earnings.ttm_da,
        ttm_capex: earnings.ttm_capex,
        adjustment: earnings.adjustment,
        adjusted_operating_income: earnings.adjusted_operating_income,
        median_tax_rate: earnings.median_tax_rate,
        tax_rate_defaulted: earnings.tax_rate_defaulted,
        tax_quarters_used: earnings.tax_quarters_used,
        adjusted_oi_after_tax: earnings.adjusted_oi_after_tax,
        stored_ev: earnings.stored_ev,
        stored_market_cap: earnings.stored_market_cap,
        updated_ev: ev.updated_ev,
        updated_market_cap: ev.updated_market_cap,
        ev_difference: ev.ev_difference,
        share_count: ev.share_count,
        current_price: ev.current_price,
        ev_reconciled: ev.reconciled,
        as_of_period: earnings.as_of_period.clone(),
    })
}
