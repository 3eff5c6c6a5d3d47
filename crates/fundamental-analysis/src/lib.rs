//! Fundamental valuation math for the watchlist.
//!
//! Adjusted P/E: TTM operating income corrected for depreciation in excess
//! of capex, taxed at the median historical rate, priced against an
//! enterprise value refreshed to the current share price. Plus the
//! two-year growth and forward P/E composites derived from stored metrics.

pub mod adjusted_pe;
pub mod growth;

pub use adjusted_pe::{
    adjusted_pe, depreciation_adjustment, reconcile_enterprise_value, AdjustedEarnings,
    AdjustedEarningsCalculator, EvReconciliation, DEFAULT_TAX_RATE,
};
pub use growth::{two_year_annualized_growth, two_year_forward_pe};
