//! Market data provider boundary
//!
//! A provider turns an instrument key and a timeframe into raw candles. The
//! transport retries transient failures itself; whatever reaches the caller is
//! either a typed [`ProviderResponse`] or an exhausted [`TransportError`].

pub mod upstox;

#[cfg(test)]
pub(crate) mod mock;

use crate::database::enums::Timeframe;
use crate::errors::PipelineError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use upstox::UpstoxClient;

/// One OHLCV sample as delivered by the provider, timestamp in market local time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub timestamp: DateTime<FixedOffset>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub oi: i64,
}

/// Typed provider result
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    /// Well-formed success payload
    Success(Vec<RawCandle>),

    /// Provider answered but reported a logical failure (non-success status)
    ProviderError(String),

    /// Payload did not have the expected shape
    MalformedResponse(String),
}

impl ProviderResponse {
    /// Collapse into candles, mapping both failure shapes to `ProviderLogical`
    pub fn into_candles(self) -> Result<Vec<RawCandle>, PipelineError> {
        match self {
            ProviderResponse::Success(candles) => Ok(candles),
            ProviderResponse::ProviderError(message) => Err(PipelineError::ProviderLogical(message)),
            ProviderResponse::MalformedResponse(detail) => Err(PipelineError::ProviderLogical(
                format!("malformed response: {}", detail),
            )),
        }
    }
}

/// Transport failures left over after retries
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<TransportError> for PipelineError {
    fn from(err: TransportError) -> Self {
        PipelineError::TransientNetwork(err.to_string())
    }
}

/// Inclusive date range requested from the historical endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl HistoricalWindow {
    /// Window ending yesterday in the market timezone and spanning `lookback_days`
    pub fn trailing(now: DateTime<Utc>, market_offset: FixedOffset, lookback_days: i64) -> Self {
        let today = now.with_timezone(&market_offset).date_naive();
        let to = today - Duration::days(1);
        let from = to - Duration::days(lookback_days);
        Self { from, to }
    }

    /// Provider date format, e.g. `2025-06-05`
    pub fn format_date(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }
}

/// Source of candles for one instrument
#[async_trait::async_trait]
pub trait CandleProvider: Send + Sync {
    /// Completed candles within a date window
    async fn fetch_historical(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        window: &HistoricalWindow,
    ) -> Result<ProviderResponse, TransportError>;

    /// Candles of the current trading session, the last one possibly still forming
    async fn fetch_intraday(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> Result<ProviderResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    #[test]
    fn test_trailing_window_uses_market_date() {
        // 20:00 UTC on the 5th is already the 6th in IST
        let now = Utc.with_ymd_and_hms(2025, 6, 5, 20, 0, 0).unwrap();
        let window = HistoricalWindow::trailing(now, ist(), 14);

        assert_eq!(window.to, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
        assert_eq!(window.from, NaiveDate::from_ymd_opt(2025, 5, 22).unwrap());
        assert_eq!(HistoricalWindow::format_date(window.to), "2025-06-05");
    }

    #[test]
    fn test_into_candles() {
        assert!(ProviderResponse::Success(vec![]).into_candles().unwrap().is_empty());

        let err = ProviderResponse::ProviderError("UDAPI100011".to_string())
            .into_candles()
            .unwrap_err();
        assert!(matches!(err, PipelineError::ProviderLogical(_)));

        let err = ProviderResponse::MalformedResponse("missing data".to_string())
            .into_candles()
            .unwrap_err();
        assert!(err.to_string().contains("malformed response"));
    }

    #[test]
    fn test_transport_error_is_transient() {
        let err: PipelineError = TransportError::RetriesExhausted {
            attempts: 4,
            message: "HTTP 503".to_string(),
        }
        .into();
        assert!(matches!(err, PipelineError::TransientNetwork(_)));
    }
}
