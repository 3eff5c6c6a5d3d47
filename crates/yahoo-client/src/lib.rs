//! Yahoo Finance quoteSummary client: analyst revenue-growth estimates and
//! short interest.

use analysis_core::{
    DataError, GrowthEstimate, GrowthEstimateProvider, ShortInterest, ShortInterestProvider,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const BASE_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

/// quoteSummary rejects requests without a session cookie and the crumb
/// issued for it. Both are fetched on first use and refreshed on a 401.
#[derive(Clone)]
pub struct YahooFinanceClient {
    client: reqwest::Client,
    base_url: String,
    cookie_url: String,
    crumb_url: String,
    crumb: Arc<RwLock<Option<String>>>,
}

impl YahooFinanceClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: BASE_URL.to_string(),
            cookie_url: COOKIE_URL.to_string(),
            crumb_url: CRUMB_URL.to_string(),
            crumb: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_session_urls(
        mut self,
        cookie_url: impl Into<String>,
        crumb_url: impl Into<String>,
    ) -> Self {
        self.cookie_url = cookie_url.into();
        self.crumb_url = crumb_url.into();
        self
    }

    /// Cached crumb, or a fresh cookie/crumb handshake.
    async fn crumb(&self) -> Result<String, DataError> {
        if let Some(crumb) = self.crumb.read().await.clone() {
            return Ok(crumb);
        }

        let mut slot = self.crumb.write().await;
        if let Some(crumb) = slot.clone() {
            return Ok(crumb);
        }

        // Any status is fine here; only the Set-Cookie header matters
        self.client
            .get(&self.cookie_url)
            .send()
            .await
            .map_err(|e| DataError::Api(e.to_string()))?;

        let response = self
            .client
            .get(&self.crumb_url)
            .send()
            .await
            .map_err(|e| DataError::Api(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(DataError::RateLimited("Yahoo crumb".to_string())),
            s => return Err(DataError::Api(format!("Yahoo crumb HTTP {}", s))),
        }

        let body = response.text().await.map_err(|e| DataError::Parse(e.to_string()))?;
        let crumb = parse_crumb(&body)?;
        tracing::debug!("Obtained Yahoo session crumb");

        *slot = Some(crumb.clone());
        Ok(crumb)
    }

    async fn invalidate_crumb(&self) {
        *self.crumb.write().await = None;
    }

    /// First `quoteSummary.result` entry for the requested modules.
    async fn quote_summary(&self, symbol: &str, modules: &str) -> Result<Value, DataError> {
        let url = format!("{}/{}", self.base_url, symbol);
        tracing::debug!("Fetching Yahoo quoteSummary {} for {}", modules, symbol);

        for attempt in 0..2 {
            let crumb = self.crumb().await?;
            let response = self
                .client
                .get(&url)
                .query(&[("modules", modules), ("crumb", crumb.as_str())])
                .send()
                .await
                .map_err(|e| DataError::Api(e.to_string()))?;

            match response.status() {
                s if s.is_success() => {}
                StatusCode::UNAUTHORIZED if attempt == 0 => {
                    tracing::debug!("Yahoo rejected the session crumb, refreshing");
                    self.invalidate_crumb().await;
                    continue;
                }
                StatusCode::NOT_FOUND => return Err(DataError::NotFound(format!("{} not found on Yahoo", symbol))),
                StatusCode::TOO_MANY_REQUESTS => return Err(DataError::RateLimited("Yahoo".to_string())),
                s => return Err(DataError::Api(format!("Yahoo quoteSummary HTTP {}", s))),
            }

            let json: Value = response.json().await.map_err(|e| DataError::Parse(e.to_string()))?;
            return first_result(symbol, json);
        }

        Err(DataError::Api("Yahoo rejected a freshly issued crumb".to_string()))
    }
}

impl Default for YahooFinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GrowthEstimateProvider for YahooFinanceClient {
    async fn growth_estimates(&self, ticker: &str) -> Result<GrowthEstimate, DataError> {
        let summary = self.quote_summary(ticker, "earningsTrend").await?;
        parse_growth(ticker, &summary)
    }
}

#[async_trait]
impl ShortInterestProvider for YahooFinanceClient {
    async fn short_interest(&self, ticker: &str) -> Result<ShortInterest, DataError> {
        let summary = self.quote_summary(ticker, "defaultKeyStatistics").await?;
        parse_short_interest(ticker, &summary)
    }
}

fn first_result(symbol: &str, json: Value) -> Result<Value, DataError> {
    let summary = json
        .get("quoteSummary")
        .ok_or_else(|| DataError::Parse("missing quoteSummary".to_string()))?;

    if let Some(error) = summary.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
        if code.eq_ignore_ascii_case("Not Found") {
            return Err(DataError::NotFound(format!("{} not found on Yahoo", symbol)));
        }
        return Err(DataError::Api(format!("Yahoo error for {}: {}", symbol, error)));
    }

    summary
        .get("result")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .cloned()
        .ok_or_else(|| DataError::NotFound(format!("no quoteSummary result for {}", symbol)))
}

/// The crumb endpoint answers with the bare token; anything else (an HTML
/// consent page, an error text) means the handshake failed.
fn parse_crumb(body: &str) -> Result<String, DataError> {
    let crumb = body.trim();
    let plausible = !crumb.is_empty()
        && crumb.len() <= 64
        && !crumb.chars().any(|c| c.is_whitespace() || c == '<' || c == '{');
    if plausible {
        Ok(crumb.to_string())
    } else {
        Err(DataError::Api("Yahoo returned no usable crumb".to_string()))
    }
}

fn raw(value: Option<&Value>) -> Option<f64> {
    value.and_then(|v| v.get("raw")).and_then(Value::as_f64)
}

/// Revenue growth for the current ("0y") and next ("+1y") fiscal years,
/// converted from fractions to percent.
fn parse_growth(symbol: &str, summary: &Value) -> Result<GrowthEstimate, DataError> {
    let trend = summary
        .get("earningsTrend")
        .and_then(|t| t.get("trend"))
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::NotFound(format!("no growth estimates for {}", symbol)))?;

    let revenue_growth = |period: &str| {
        trend
            .iter()
            .find(|t| t.get("period").and_then(Value::as_str) == Some(period))
            .and_then(|t| raw(t.get("revenueEstimate").and_then(|r| r.get("growth"))))
            .map(|g| g * 100.0)
    };

    let estimate = GrowthEstimate {
        current_year_growth: revenue_growth("0y"),
        next_year_growth: revenue_growth("+1y"),
    };

    if estimate.current_year_growth.is_none() && estimate.next_year_growth.is_none() {
        return Err(DataError::NotFound(format!("no growth estimates for {}", symbol)));
    }
    Ok(estimate)
}

fn parse_short_interest(symbol: &str, summary: &Value) -> Result<ShortInterest, DataError> {
    raw(summary
        .get("defaultKeyStatistics")
        .and_then(|s| s.get("shortPercentOfFloat")))
    .map(|fraction| ShortInterest {
        short_float: fraction * 100.0,
    })
    .ok_or_else(|| DataError::NotFound(format!("no short interest for {}", symbol)))
}
