use analysis_core::{DerivedMetricRecord, MetricKind, MetricOutcome, MetricStatus, MetricStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::in_flight::InFlightSet;

/// Produces the outcome of one metric for one ticker. Failures are part of
/// the outcome; panics are caught by the dispatcher.
#[async_trait]
pub trait MetricComputation: Send + Sync + 'static {
    async fn compute(&self, ticker: &str, kind: MetricKind) -> MetricOutcome;
}

#[derive(Debug)]
pub enum Dispatch {
    /// A background task was spawned. Dropping the handle detaches it.
    Started(JoinHandle<()>),
    AlreadyInFlight,
}

impl Dispatch {
    pub fn is_started(&self) -> bool {
        matches!(self, Dispatch::Started(_))
    }
}

/// Runs metric computations off the request path, at most one per
/// (ticker, kind), and persists every attempt's outcome.
#[derive(Clone)]
pub struct MetricDispatcher {
    in_flight: InFlightSet,
    store: Arc<dyn MetricStore>,
    computer: Arc<dyn MetricComputation>,
}

impl MetricDispatcher {
    pub fn new(store: Arc<dyn MetricStore>, computer: Arc<dyn MetricComputation>) -> Self {
        Self {
            in_flight: InFlightSet::new(),
            store,
            computer,
        }
    }

    /// Start a background computation unless one is already running for the
    /// pair. Never waits for the computation. Must be called from within a
    /// Tokio runtime.
    pub fn trigger(&self, ticker: &str, kind: MetricKind) -> Dispatch {
        let Some(guard) = self.in_flight.try_acquire(ticker, kind) else {
            tracing::debug!("{} for {} already in flight, skipping", kind, ticker);
            return Dispatch::AlreadyInFlight;
        };

        let ticker = ticker.to_string();
        let store = Arc::clone(&self.store);
        let computer = Arc::clone(&self.computer);

        let handle = tokio::spawn(async move {
            // Released after the outcome is persisted, or on abort
            let _guard = guard;

            tracing::info!("Computing {} for {}", kind, ticker);

            let task_ticker = ticker.clone();
            let computation =
                tokio::spawn(async move { computer.compute(&task_ticker, kind).await });

            let outcome = match computation.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("{} computation for {} panicked: {}", kind, ticker, e);
                    MetricOutcome::Failed(MetricStatus::Error)
                }
            };

            let record = DerivedMetricRecord::from_outcome(&ticker, kind, outcome, Utc::now());
            match record.status {
                MetricStatus::Success => {
                    tracing::info!("{} for {} computed", kind, ticker)
                }
                status => tracing::warn!("{} for {} failed: {}", kind, ticker, status),
            }

            if let Err(e) = store.upsert(&record).await {
                tracing::error!("Failed to persist {} for {}: {}", kind, ticker, e);
            }
        });

        Dispatch::Started(handle)
    }

    pub fn is_in_flight(&self, ticker: &str, kind: MetricKind) -> bool {
        self.in_flight.contains(ticker, kind)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }
}
