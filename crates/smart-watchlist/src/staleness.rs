//! Whether a stored metric should be recomputed on this view load.
//!
//! A usable value is never recomputed. Permanent failures (the data does
//! not exist, or the formula is undefined for it) are never retried.
//! Transient failures are retried once the kind's cooldown has elapsed.

use analysis_core::{DerivedMetricRecord, MetricKind, MetricStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// A usable value is stored
    Fresh,
    /// The last attempt failed in a way a retry cannot fix
    PermanentFailure(MetricStatus),
    /// Transient failure still inside its cooldown window
    CoolingDown { remaining: Duration },
    Eligible,
}

impl Eligibility {
    pub fn should_refresh(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_delay_secs: u64,
}

impl RetryPolicy {
    pub fn from_secs(retry_delay_secs: u64) -> Self {
        Self { retry_delay_secs }
    }

    pub fn retry_delay(&self) -> Duration {
        i64::try_from(self.retry_delay_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_secs(3600)
    }
}

/// Per-kind retry parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessPolicy {
    pub adjusted_pe: RetryPolicy,
    pub growth: RetryPolicy,
    pub short_interest: RetryPolicy,
}

impl StalenessPolicy {
    pub fn retry_policy(&self, kind: MetricKind) -> RetryPolicy {
        match kind {
            MetricKind::AdjustedPe => self.adjusted_pe,
            MetricKind::Growth => self.growth,
            MetricKind::ShortInterest => self.short_interest,
        }
    }

    /// `record` is the stored state for `kind`; `None` means it was never attempted.
    pub fn evaluate(
        &self,
        kind: MetricKind,
        record: Option<&DerivedMetricRecord>,
        now: DateTime<Utc>,
    ) -> Eligibility {
        let Some(record) = record else {
            return Eligibility::Eligible;
        };

        if record.usable_value().is_some() {
            return Eligibility::Fresh;
        }

        let status = record.status;
        if status.is_permanent_failure() {
            Eligibility::PermanentFailure(status)
        } else if status.is_transient_failure() {
            self.cooldown(kind, record.last_updated, now)
        } else {
            // Success without a usable value, or an attempt that never finished
            Eligibility::Eligible
        }
    }

    fn cooldown(
        &self,
        kind: MetricKind,
        last_updated: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Eligibility {
        let Some(last_updated) = last_updated else {
            return Eligibility::Eligible;
        };

        let elapsed = now - last_updated;
        // A timestamp from the future cannot be trusted to ever expire
        if elapsed < Duration::zero() {
            return Eligibility::Eligible;
        }

        let delay = self.retry_policy(kind).retry_delay();
        if elapsed > delay {
            Eligibility::Eligible
        } else {
            Eligibility::CoolingDown {
                remaining: delay - elapsed,
            }
        }
    }
}
