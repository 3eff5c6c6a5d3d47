use analysis_core::{DataError, PriceQuote, QuoteProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            // Wait until the oldest request falls out of the window
            let sleep_dur = match ts.front() {
                Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                None => Duration::ZERO,
            } + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for Polygon API slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Current price and diluted share count from Polygon, used to refresh a
/// stale enterprise value.
#[derive(Clone)]
pub struct PolygonClient {
    api_key: Option<String>,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl PolygonClient {
    /// `rate_limit` is requests per minute. Free tier users should use 5.
    pub fn new(api_key: Option<String>, rate_limit: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: BASE_URL.to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_key(&self) -> Result<&str, DataError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| DataError::ApiKeyMissing("POLYGON_API_KEY".to_string()))
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, DataError> {
        let request = builder.build().map_err(|e| DataError::Api(e.to_string()))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| DataError::Api("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| DataError::Api(e.to_string()))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!("Polygon 429 rate limited, waiting {}s before retry {}/3", wait_secs, attempt + 1);
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(DataError::RateLimited("Polygon after 3 retries".to_string()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, what: &str) -> Result<T, DataError> {
        let api_key = self.api_key()?;
        let response = self
            .send_request(self.client.get(url).query(&[("apiKey", api_key)]))
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(DataError::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(DataError::ApiKeyMissing(format!("Polygon rejected key for {}", what)))
            }
            s => {
                return Err(DataError::Api(format!(
                    "{} HTTP {}: {}",
                    what,
                    s,
                    response.text().await.unwrap_or_default()
                )))
            }
        }

        response.json().await.map_err(|e| DataError::Parse(e.to_string()))
    }

    pub async fn get_snapshot(&self, symbol: &str) -> Result<SnapshotTicker, DataError> {
        let url = format!("{}/v2/snapshot/locale/us/markets/stocks/tickers/{}", self.base_url, symbol);
        let snap: SnapshotResponse = self.get_json(&url, &format!("snapshot {}", symbol)).await?;
        Ok(snap.ticker)
    }

    pub async fn get_ticker_details(&self, symbol: &str) -> Result<TickerDetails, DataError> {
        let url = format!("{}/v3/reference/tickers/{}", self.base_url, symbol);
        let details: TickerDetailsResponse = self.get_json(&url, &format!("ticker details {}", symbol)).await?;
        Ok(details.results)
    }
}

#[async_trait]
impl QuoteProvider for PolygonClient {
    async fn current_quote(&self, ticker: &str) -> Result<PriceQuote, DataError> {
        let (snapshot, details) = tokio::join!(self.get_snapshot(ticker), self.get_ticker_details(ticker));

        let price = snapshot?
            .current_price()
            .ok_or_else(|| DataError::NotFound(format!("no current price for {}", ticker)))?;

        // Share count is optional; the calculator can fall back to the series
        let shares_diluted = match details {
            Ok(d) => d.weighted_shares_outstanding.or(d.share_class_shares_outstanding),
            Err(e) => {
                tracing::warn!("Ticker details unavailable for {}: {}", ticker, e);
                None
            }
        };

        Ok(PriceQuote { price, shares_diluted })
    }
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    results: TickerDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDetails {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub share_class_shares_outstanding: Option<f64>,
    #[serde(default)]
    pub weighted_shares_outstanding: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: SnapshotTicker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTicker {
    pub day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    pub last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    pub prev_day: Option<SnapshotDay>,
}

impl SnapshotTicker {
    /// Last trade, else today's close, else the previous close. Zero prices
    /// (pre-market snapshots) are skipped.
    pub fn current_price(&self) -> Option<f64> {
        let positive = |p: Option<f64>| p.filter(|v| *v > 0.0);
        positive(self.last_trade.as_ref().and_then(|t| t.p))
            .or_else(|| positive(self.day.as_ref().and_then(|d| d.c)))
            .or_else(|| positive(self.prev_day.as_ref().and_then(|d| d.c)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDay {
    pub o: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub c: Option<f64>,
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLastTrade {
    pub p: Option<f64>,
    pub s: Option<i64>,
    pub t: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_price_prefers_last_trade() {
        let json = r#"{"ticker":{"day":{"o":1.0,"h":2.0,"l":0.5,"c":1.5,"v":100.0},
            "lastTrade":{"p":1.75,"s":10,"t":1},"prevDay":{"o":1.0,"h":1.0,"l":1.0,"c":1.2,"v":5.0}}}"#;
        let snap: SnapshotResponse = serde_json::from_str(json).unwrap();
        assert_eq!(snap.ticker.current_price(), Some(1.75));
    }

    #[test]
    fn test_snapshot_price_skips_zero_day_close() {
        let json = r#"{"ticker":{"day":{"o":0.0,"h":0.0,"l":0.0,"c":0.0,"v":0.0},
            "lastTrade":null,"prevDay":{"o":1.0,"h":1.0,"l":1.0,"c":1.2,"v":5.0}}}"#;
        let snap: SnapshotResponse = serde_json::from_str(json).unwrap();
        assert_eq!(snap.ticker.current_price(), Some(1.2));
    }

    #[test]
    fn test_ticker_details_tolerates_missing_fields() {
        let json = r#"{"results":{"ticker":"AAPL","weighted_shares_outstanding":15000000000.0}}"#;
        let details: TickerDetailsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(details.results.weighted_shares_outstanding, Some(15_000_000_000.0));
        assert!(details.results.share_class_shares_outstanding.is_none());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_reported_without_request() {
        let client = PolygonClient::new(Some("  ".to_string()), 5);
        let err = client.current_quote("AAPL").await.unwrap_err();
        assert!(matches!(err, DataError::ApiKeyMissing(_)));
    }
}
