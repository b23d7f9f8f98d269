use crate::api::responses::*;
use crate::database::models::Instrument;
use crate::database::repositories::MarketDataRepository;
use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

const MAX_CANDLE_LIMIT: i64 = 1000;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub repository: Arc<dyn MarketDataRepository>,
}

/// Run a blocking storage read off the async runtime
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, crate::database::DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Task(e.to_string()))?
        .map_err(ApiError::from)
}

/// Service status
#[utoipa::path(
    get,
    path = "/",
    tag = "Health",
    responses(
        (status = 200, description = "Service is running", body = StatusResponse)
    )
)]
pub async fn get_status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
    })
}

/// Get all instruments
#[utoipa::path(
    get,
    path = "/api/v1/instruments",
    tag = "Instruments",
    responses(
        (status = 200, description = "All instruments ordered by key", body = Vec<Instrument>),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Database pool exhausted", body = ErrorResponse)
    )
)]
pub async fn get_instruments(State(state): State<ApiState>) -> Result<Json<Vec<Instrument>>, ApiError> {
    let repository = state.repository.clone();
    blocking(move || repository.get_instruments()).await.map(Json)
}

/// Get the newest candles of an instrument and timeframe
#[utoipa::path(
    get,
    path = "/api/v1/candles",
    tag = "Candles",
    params(CandleQuery),
    responses(
        (status = 200, description = "Candles, newest first", body = CandleListResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Database pool exhausted", body = ErrorResponse)
    )
)]
pub async fn get_candles(
    State(state): State<ApiState>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<CandleListResponse>, ApiError> {
    if !(1..=MAX_CANDLE_LIMIT).contains(&query.limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_CANDLE_LIMIT
        )));
    }

    let repository = state.repository.clone();
    let key = query.instrument_key.clone();
    let timeframe = query.timeframe;
    let limit = query.limit;
    let candles = blocking(move || repository.get_candles(&key, timeframe, Some(limit))).await?;

    Ok(Json(CandleListResponse {
        instrument_key: query.instrument_key,
        timeframe,
        count: candles.len(),
        candles,
    }))
}
