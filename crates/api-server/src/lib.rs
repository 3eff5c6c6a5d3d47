//! HTTP surface for the stock watchlist and its derived metrics.

pub mod config;

mod adjusted_pe_routes;
mod watchlist_routes;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fundamental_analysis::AdjustedEarningsCalculator;
use polygon_client::PolygonClient;
use quickfs_client::QuickFsClient;
use serde::Serialize;
use smart_watchlist::{
    EngineConfig, MetricComputer, MetricDispatcher, SqliteMetricStore, WatchlistDb,
    WatchlistService,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use yahoo_client::YahooFinanceClient;

use crate::config::ServerConfig;

pub use adjusted_pe_routes::adjusted_pe_routes;
pub use watchlist_routes::watchlist_routes;

#[derive(Clone)]
pub struct AppState {
    pub watchlist: WatchlistService,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Handler error rendered as an `ApiResponse` with `success: false`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(message.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: anyhow::anyhow!(message.into()),
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        }
        let body = ApiResponse::<()>::error(self.error.to_string());
        (self.status, Json(body)).into_response()
    }
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(watchlist_routes())
        .merge(adjusted_pe_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wires the data clients, store and dispatcher into the watchlist service.
pub async fn build_state(config: &EngineConfig) -> anyhow::Result<AppState> {
    let db = WatchlistDb::new(&config.database_url).await?;
    let store = Arc::new(SqliteMetricStore::new(db.pool().clone()));

    if config.quickfs_api_key.is_none() {
        tracing::warn!("QUICKFS_API_KEY not set, adjusted P/E will report api_key_missing");
    }
    if config.polygon_api_key.is_none() {
        tracing::warn!("POLYGON_API_KEY not set, adjusted P/E will use stored enterprise values");
    }

    let yahoo = Arc::new(YahooFinanceClient::new());
    let computer = MetricComputer::new(
        Arc::new(QuickFsClient::new(config.quickfs_api_key.clone())),
        Arc::new(PolygonClient::new(
            config.polygon_api_key.clone(),
            config.polygon_rate_limit,
        )),
        yahoo.clone(),
        yahoo,
        AdjustedEarningsCalculator::new(config.default_tax_rate),
    );

    let dispatcher = MetricDispatcher::new(store, Arc::new(computer));
    let watchlist = WatchlistService::new(db, dispatcher, config.staleness_policy());

    Ok(AppState { watchlist })
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("PANIC: {info}");
    }));

    let config = ServerConfig::from_env()?;
    let state = build_state(&config.engine).await?;

    match state.watchlist.watchlist_count().await {
        Ok(count) => tracing::info!("Loaded watchlist with {} tickers", count),
        Err(e) => tracing::warn!("Could not count watchlist: {}", e),
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("API server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod route_tests;
