use std::sync::Arc;
use std::time::Duration;

use analysis_core::{MetricKind, MetricOutcome, MetricStatus};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use smart_watchlist::{
    MetricComputation, MetricDispatcher, SqliteMetricStore, StalenessPolicy, WatchlistDb,
    WatchlistService,
};
use tower::ServiceExt;

use crate::{build_router, AppState};

struct NoDataComputation;

#[async_trait]
impl MetricComputation for NoDataComputation {
    async fn compute(&self, _ticker: &str, _kind: MetricKind) -> MetricOutcome {
        MetricOutcome::Failed(MetricStatus::NoData)
    }
}

async fn test_state() -> AppState {
    let db = WatchlistDb::new("sqlite::memory:").await.unwrap();
    let store = Arc::new(SqliteMetricStore::new(db.pool().clone()));
    let dispatcher = MetricDispatcher::new(store, Arc::new(NoDataComputation));
    AppState {
        watchlist: WatchlistService::new(db, dispatcher, StalenessPolicy::default()),
    }
}

async fn settle(state: &AppState) {
    for _ in 0..200 {
        if state.watchlist.dispatcher().in_flight_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("computations did not finish");
}

async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let state = test_state().await;
    let (status, body) = send(&state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_add_and_list() {
    let state = test_state().await;

    let (status, body) = send(
        &state,
        "POST",
        "/api/watchlist",
        Some(json!({ "ticker": "aapl", "company_name": "Apple Inc." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "added");
    assert_eq!(body["data"]["ticker"], "AAPL");

    let (_, body) = send(&state, "POST", "/api/watchlist", Some(json!({ "ticker": "AAPL" }))).await;
    assert_eq!(body["data"]["outcome"], "already_present");

    settle(&state).await;
    let (status, body) = send(&state, "GET", "/api/watchlist", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["ticker"], "AAPL");
    assert_eq!(entries[0]["company_name"], "Apple Inc.");
    assert_eq!(entries[0]["adjusted_pe"]["loading"], false);
    assert_eq!(entries[0]["adjusted_pe"]["status"], "no_data");
    assert!(entries[0]["two_year_forward_pe"].is_null());
}

#[tokio::test]
async fn test_invalid_ticker_is_rejected() {
    let state = test_state().await;
    let (status, body) = send(&state, "POST", "/api/watchlist", Some(json!({ "ticker": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_remove() {
    let state = test_state().await;
    let (status, _) = send(&state, "DELETE", "/api/watchlist/MSFT", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&state, "POST", "/api/watchlist", Some(json!({ "ticker": "MSFT" }))).await;
    settle(&state).await;

    let (status, body) = send(&state, "DELETE", "/api/watchlist/msft", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(state.watchlist.watchlist_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_adjusted_pe_detail() {
    let state = test_state().await;
    let (status, _) = send(&state, "GET", "/api/adjusted-pe/NVDA", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&state, "POST", "/api/watchlist", Some(json!({ "ticker": "NVDA" }))).await;
    settle(&state).await;

    let (status, body) = send(&state, "GET", "/api/adjusted-pe/nvda", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["kind"], "adjusted_pe");
    assert_eq!(body["data"]["status"], "no_data");
}

#[tokio::test]
async fn test_refresh_skips_permanent_failures() {
    let state = test_state().await;
    send(&state, "POST", "/api/watchlist", Some(json!({ "ticker": "GME" }))).await;
    settle(&state).await;

    let (status, body) = send(&state, "POST", "/api/watchlist/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["started"], 0);
}
