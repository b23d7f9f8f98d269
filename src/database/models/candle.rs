use crate::database::enums::Timeframe;
use crate::provider::RawCandle;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OHLCV candle entity
///
/// Unique per (instrument_key, timeframe, timestamp).
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::database::schema::candles)]
pub struct Candle {
    pub id: i64,

    /// Owning instrument (foreign key to instruments)
    pub instrument_key: String,

    pub timeframe: Timeframe,

    /// Bucket start, always UTC
    pub timestamp: DateTime<Utc>,

    #[schema(value_type = String, example = "2958.40")]
    pub open: Decimal,
    #[schema(value_type = String)]
    pub high: Decimal,
    #[schema(value_type = String)]
    pub low: Decimal,
    #[schema(value_type = String)]
    pub close: Decimal,
    pub volume: i64,

    /// Open interest, 0 for cash equities
    pub oi: i64,
}

/// New candle for insertion or upsert
#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::candles)]
pub struct NewCandle {
    pub instrument_key: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub oi: i64,
}

impl NewCandle {
    /// Build a row for a partition, normalizing the provider timestamp to UTC
    pub fn from_raw(instrument_key: &str, timeframe: Timeframe, raw: &RawCandle) -> Self {
        Self {
            instrument_key: instrument_key.to_string(),
            timeframe,
            timestamp: raw.timestamp.with_timezone(&Utc),
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            oi: raw.oi,
        }
    }
}
