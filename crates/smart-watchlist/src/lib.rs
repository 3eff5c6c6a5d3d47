//! Derived-metric refresh engine for the stock watchlist.
//!
//! Each watched ticker tracks three derived metrics (adjusted P/E, analyst
//! growth, short interest). Reading the watchlist resolves each metric from
//! the store; missing or stale ones are recomputed in the background, at
//! most one computation per (ticker, metric) at a time, and every attempt's
//! outcome is persisted with a status the staleness policy acts on.

pub mod computations;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod in_flight;
pub mod metric_store;
pub mod models;
pub mod service;
pub mod staleness;

#[cfg(test)]
mod test_support;

pub use computations::MetricComputer;
pub use config::EngineConfig;
pub use db::WatchlistDb;
pub use dispatcher::{Dispatch, MetricComputation, MetricDispatcher};
pub use in_flight::{InFlightGuard, InFlightSet};
pub use metric_store::SqliteMetricStore;
pub use models::{AddOutcome, MetricView, WatchlistEntry, WatchlistItem};
pub use service::{normalize_ticker, WatchlistService};
pub use staleness::{Eligibility, RetryPolicy, StalenessPolicy};
