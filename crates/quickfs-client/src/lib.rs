//! QuickFS "all data" client producing quarterly financial arrays.

use analysis_core::{DataError, FinancialSeriesProvider, QuarterlyFinancialSeries};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const BASE_URL: &str = "https://public-api.quickfs.net/v1";

#[derive(Clone)]
pub struct QuickFsClient {
    api_key: Option<String>,
    base_url: String,
    client: Client,
}

impl QuickFsClient {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// QuickFS wants an exchange suffix; bare tickers are US listings.
    pub fn format_symbol(ticker: &str) -> String {
        let ticker = ticker.trim().to_uppercase();
        if ticker.contains(':') {
            ticker
        } else {
            format!("{}:US", ticker)
        }
    }

    async fn fetch_all_data(&self, ticker: &str) -> Result<AllDataResponse, DataError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DataError::ApiKeyMissing("QUICKFS_API_KEY".to_string()))?;

        let symbol = Self::format_symbol(ticker);
        let url = format!("{}/data/all-data/{}", self.base_url, symbol);
        tracing::debug!("Fetching QuickFS data for {} ({})", ticker, symbol);

        let response = self
            .client
            .get(&url)
            .header("X-QFS-API-Key", api_key)
            .send()
            .await
            .map_err(|e| DataError::Api(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(DataError::NotFound(format!("{} not found on QuickFS", ticker))),
            StatusCode::TOO_MANY_REQUESTS => return Err(DataError::RateLimited("QuickFS".to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(DataError::ApiKeyMissing("QuickFS rejected the API key".to_string()))
            }
            s => {
                return Err(DataError::Api(format!(
                    "QuickFS HTTP {}: {}",
                    s,
                    response.text().await.unwrap_or_default()
                )))
            }
        }

        response.json().await.map_err(|e| DataError::Parse(e.to_string()))
    }
}

#[async_trait]
impl FinancialSeriesProvider for QuickFsClient {
    async fn quarterly_series(&self, ticker: &str) -> Result<QuarterlyFinancialSeries, DataError> {
        let body = self.fetch_all_data(ticker).await?;
        parse_quarterly(ticker, body)
    }
}

#[derive(Debug, Deserialize)]
struct AllDataResponse {
    #[serde(default)]
    data: Option<AllData>,
}

#[derive(Debug, Deserialize)]
struct AllData {
    #[serde(default)]
    financials: Option<Financials>,
}

#[derive(Debug, Deserialize)]
struct Financials {
    #[serde(default)]
    quarterly: HashMap<String, Value>,
}

fn numeric_array(quarterly: &HashMap<String, Value>, key: &str) -> Vec<Option<f64>> {
    quarterly
        .get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().map(Value::as_f64).collect())
        .unwrap_or_default()
}

fn parse_quarterly(ticker: &str, body: AllDataResponse) -> Result<QuarterlyFinancialSeries, DataError> {
    let quarterly = body
        .data
        .and_then(|d| d.financials)
        .map(|f| f.quarterly)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| DataError::NotFound(format!("no quarterly financials for {}", ticker)))?;

    let mut depreciation_amortization = numeric_array(&quarterly, "cfo_da");
    if depreciation_amortization.iter().all(Option::is_none) {
        depreciation_amortization = numeric_array(&quarterly, "da_income_statement_supplemental");
    }

    let periods = quarterly
        .get("period_end_date")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(QuarterlyFinancialSeries {
        ticker: ticker.trim().to_uppercase(),
        operating_income: numeric_array(&quarterly, "operating_income"),
        depreciation_amortization,
        capex: numeric_array(&quarterly, "capex"),
        income_tax: numeric_array(&quarterly, "income_tax"),
        pretax_income: numeric_array(&quarterly, "pretax_income"),
        enterprise_value: numeric_array(&quarterly, "enterprise_value"),
        market_cap: numeric_array(&quarterly, "market_cap"),
        shares_diluted: numeric_array(&quarterly, "shares_diluted"),
        periods,
    })
}
