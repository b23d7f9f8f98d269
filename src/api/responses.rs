use crate::database::enums::Timeframe;
use crate::database::models::Candle;
use crate::database::DatabaseError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::{IntoParams, ToSchema};

/// Service liveness
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    #[schema(example = "running")]
    pub status: String,
}

/// Query parameters for candle listing
#[derive(Debug, Deserialize, IntoParams)]
pub struct CandleQuery {
    /// Instrument key, e.g. `NSE_EQ|INE002A01018`
    pub instrument_key: String,

    /// Timeframe label, e.g. `15m`
    #[param(value_type = String, example = "15m")]
    pub timeframe: Timeframe,

    /// Newest candles to return (1-1000)
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Candles of one partition, newest first
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CandleListResponse {
    pub instrument_key: String,
    #[schema(value_type = String, example = "15m")]
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub count: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Errors surfaced by the read API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(DatabaseError::ConnectionPoolError(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) | ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("API request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
