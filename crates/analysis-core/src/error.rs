use thiserror::Error;

use crate::MetricStatus;

/// Failure reported by an external data collaborator (financial series,
/// quotes, growth estimates, short interest).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("No data available: {0}")]
    NotFound(String),

    #[error("API key not configured: {0}")]
    ApiKeyMissing(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl DataError {
    /// Status persisted when a computation fails with this error.
    pub fn status(&self) -> MetricStatus {
        match self {
            DataError::NotFound(_) => MetricStatus::NoData,
            DataError::ApiKeyMissing(_) => MetricStatus::ApiKeyMissing,
            DataError::RateLimited(_) | DataError::Api(_) | DataError::Parse(_) => {
                MetricStatus::Error
            }
        }
    }
}

/// The adjusted-earnings formula could not produce a result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalculationError {
    #[error("No financial data available")]
    NoFinancialData,

    #[error("Insufficient quarterly history: {0}")]
    InsufficientHistory(String),

    #[error("Adjusted after-tax earnings are zero")]
    ZeroAdjustedEarnings,
}

impl CalculationError {
    pub fn status(&self) -> MetricStatus {
        match self {
            CalculationError::NoFinancialData => MetricStatus::NoData,
            CalculationError::InsufficientHistory(_) => MetricStatus::InsufficientHistory,
            CalculationError::ZeroAdjustedEarnings => MetricStatus::CalculationFailed,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
