use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::staleness::{RetryPolicy, StalenessPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Database
    pub database_url: String,

    // External APIs (absent keys surface as api_key_missing per metric)
    pub quickfs_api_key: Option<String>,
    pub polygon_api_key: Option<String>,
    pub polygon_rate_limit: usize, // requests per minute

    // Calculator
    pub default_tax_rate: f64, // 0.21

    // Transient-failure cooldowns
    pub adjusted_pe_retry_secs: u64,
    pub growth_retry_secs: u64,
    pub short_interest_retry_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:stock_research.db".to_string(),
            quickfs_api_key: None,
            polygon_api_key: None,
            polygon_rate_limit: 500,
            default_tax_rate: fundamental_analysis::DEFAULT_TAX_RATE,
            adjusted_pe_retry_secs: 3600,
            growth_retry_secs: 3600,
            short_interest_retry_secs: 3600,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:stock_research.db".to_string()),

            quickfs_api_key: non_empty_var("QUICKFS_API_KEY"),
            polygon_api_key: non_empty_var("POLYGON_API_KEY"),
            polygon_rate_limit: env::var("POLYGON_RATE_LIMIT")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("POLYGON_RATE_LIMIT must be a positive integer")?,

            default_tax_rate: env::var("DEFAULT_TAX_RATE")
                .unwrap_or_else(|_| "0.21".to_string())
                .parse()
                .context("DEFAULT_TAX_RATE must be a number")?,

            adjusted_pe_retry_secs: env::var("ADJUSTED_PE_RETRY_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("ADJUSTED_PE_RETRY_SECS must be a number of seconds")?,
            growth_retry_secs: env::var("GROWTH_RETRY_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("GROWTH_RETRY_SECS must be a number of seconds")?,
            short_interest_retry_secs: env::var("SHORT_INTEREST_RETRY_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("SHORT_INTEREST_RETRY_SECS must be a number of seconds")?,
        };

        if !(0.0..=1.0).contains(&config.default_tax_rate) {
            anyhow::bail!("DEFAULT_TAX_RATE must be between 0 and 1");
        }

        Ok(config)
    }

    pub fn staleness_policy(&self) -> StalenessPolicy {
        StalenessPolicy {
            adjusted_pe: RetryPolicy::from_secs(self.adjusted_pe_retry_secs),
            growth: RetryPolicy::from_secs(self.growth_retry_secs),
            short_interest: RetryPolicy::from_secs(self.short_interest_retry_secs),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
