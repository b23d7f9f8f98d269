use super::{SyncEngine, SyncReport};
use crate::database::enums::Timeframe;
use crate::database::models::NewCandle;
use crate::database::repositories::{MarketDataTx, UpsertCounts};
use crate::errors::PipelineError;
use crate::provider::RawCandle;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

impl SyncEngine {
    /// Upsert a session batch; the newest candle may still be forming and is overwritten in place
    pub fn sync_intraday(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        batch: Vec<RawCandle>,
    ) -> Result<SyncReport, PipelineError> {
        if batch.is_empty() {
            tracing::info!("{} {}: empty intraday batch, nothing to sync", instrument_key, timeframe);
            return Ok(SyncReport::empty(instrument_key, timeframe));
        }

        let received = batch.len();
        let rows = latest_per_timestamp(instrument_key, timeframe, &batch);
        let trim_to = self.intraday_trim.then_some(self.retention);

        let mut counts = UpsertCounts::default();
        let mut trimmed = 0;

        self.repository.transaction(&mut |tx: &mut dyn MarketDataTx| {
            counts = tx.upsert_candles(instrument_key, timeframe, &rows)?;
            if let Some(keep) = trim_to {
                trimmed = tx.trim_partition(instrument_key, timeframe, keep)?;
            }
            Ok(())
        })?;

        if trimmed > 0 {
            tracing::warn!(
                "⚠️  {} {}: intraday trim removed {} candles beyond the newest {}",
                instrument_key,
                timeframe,
                trimmed,
                self.retention
            );
        }

        tracing::info!(
            "✅ {} {}: intraday sync received={} inserted={} updated={}",
            instrument_key,
            timeframe,
            received,
            counts.inserted,
            counts.updated
        );

        Ok(SyncReport {
            instrument_key: instrument_key.to_string(),
            timeframe,
            received,
            inserted: counts.inserted,
            updated: counts.updated,
            trimmed,
        })
    }
}

/// UTC rows ordered by timestamp, the last occurrence of a timestamp winning
fn latest_per_timestamp(instrument_key: &str, timeframe: Timeframe, batch: &[RawCandle]) -> Vec<NewCandle> {
    let mut by_timestamp: BTreeMap<DateTime<Utc>, NewCandle> = BTreeMap::new();
    for raw in batch {
        let row = NewCandle::from_raw(instrument_key, timeframe, raw);
        by_timestamp.insert(row.timestamp, row);
    }
    by_timestamp.into_values().collect()
}
