//! Watchlist API Routes
//!
//! The watchlist view with its derived metrics, plus add/remove and a
//! manual backfill trigger.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use smart_watchlist::{AddOutcome, WatchlistEntry};

use crate::{ApiResponse, AppError, AppState};

#[derive(Deserialize)]
pub struct AddWatchlistRequest {
    pub ticker: String,
    pub company_name: Option<String>,
}

#[derive(Serialize)]
pub struct AddWatchlistResponse {
    pub ticker: String,
    pub outcome: AddOutcome,
    pub message: String,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub started: usize,
}

pub fn watchlist_routes() -> Router<AppState> {
    Router::new()
        .route("/api/watchlist", get(get_watchlist))
        .route("/api/watchlist", post(add_to_watchlist))
        .route("/api/watchlist/refresh", post(refresh_watchlist))
        .route("/api/watchlist/:ticker", delete(remove_from_watchlist))
}

/// Watchlist view. Metrics still being computed come back with `loading: true`.
async fn get_watchlist(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WatchlistEntry>>>, AppError> {
    let entries = state.watchlist.get_watchlist().await?;
    Ok(Json(ApiResponse::success(entries)))
}

async fn add_to_watchlist(
    State(state): State<AppState>,
    Json(req): Json<AddWatchlistRequest>,
) -> Result<Json<ApiResponse<AddWatchlistResponse>>, AppError> {
    let outcome = state
        .watchlist
        .add_to_watchlist(&req.ticker, req.company_name.as_deref())
        .await?;

    let ticker = req.ticker.trim().to_uppercase();
    let message = match outcome {
        AddOutcome::Added => format!("{} added to watchlist", ticker),
        AddOutcome::AlreadyPresent => format!("{} is already in watchlist", ticker),
        AddOutcome::Invalid => return Err(AppError::bad_request(format!("Invalid ticker: {:?}", req.ticker))),
    };

    Ok(Json(ApiResponse::success(AddWatchlistResponse {
        ticker,
        outcome,
        message,
    })))
}

async fn remove_from_watchlist(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    if !state.watchlist.remove_from_watchlist(&ticker).await? {
        return Err(AppError::not_found(format!("{} is not in watchlist", ticker)));
    }
    Ok(Json(ApiResponse::success(format!(
        "{} removed from watchlist",
        ticker.trim().to_uppercase()
    ))))
}

async fn refresh_watchlist(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RefreshResponse>>, AppError> {
    let started = state.watchlist.refresh_missing().await?;
    Ok(Json(ApiResponse::success(RefreshResponse { started })))
}
