use analysis_core::DerivedMetricRecord;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::{ApiResponse, AppError, AppState};

pub fn adjusted_pe_routes() -> Router<AppState> {
    Router::new().route("/api/adjusted-pe/:ticker", get(get_adjusted_pe))
}

/// Stored adjusted P/E record with every intermediate of the calculation.
async fn get_adjusted_pe(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<DerivedMetricRecord>>, AppError> {
    let record = state
        .watchlist
        .adjusted_pe_breakdown(&ticker)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No adjusted P/E stored for {}", ticker)))?;

    Ok(Json(ApiResponse::success(record)))
}
