//! Candle synchronization into storage
//!
//! Two write paths share one engine:
//! - **historical**: insert-only diff against persisted timestamps, then a retention trim
//! - **intraday**: upsert keyed on (instrument_key, timeframe, timestamp), optionally trimmed
//!
//! Every sync runs as one transaction and is safe to repeat with the same batch.

mod historical;
mod intraday;

use crate::database::enums::Timeframe;
use crate::database::repositories::MarketDataRepository;
use serde::Serialize;
use std::sync::Arc;

/// Counts produced by one partition sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub instrument_key: String,
    pub timeframe: Timeframe,
    /// Rows handed to the engine, before de-duplication
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub trimmed: usize,
}

impl SyncReport {
    fn empty(instrument_key: &str, timeframe: Timeframe) -> Self {
        Self {
            instrument_key: instrument_key.to_string(),
            timeframe,
            received: 0,
            inserted: 0,
            updated: 0,
            trimmed: 0,
        }
    }
}

/// Writes candle batches for one (instrument, timeframe) partition at a time
///
/// Calls block on storage; async callers go through `spawn_blocking`.
pub struct SyncEngine {
    repository: Arc<dyn MarketDataRepository>,
    retention: usize,
    intraday_trim: bool,
}

impl SyncEngine {
    pub fn new(repository: Arc<dyn MarketDataRepository>, retention: usize, intraday_trim: bool) -> Self {
        Self {
            repository,
            retention,
            intraday_trim,
        }
    }
}
