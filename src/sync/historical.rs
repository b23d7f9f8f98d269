use super::{SyncEngine, SyncReport};
use crate::database::enums::Timeframe;
use crate::database::models::NewCandle;
use crate::database::repositories::MarketDataTx;
use crate::errors::PipelineError;
use crate::provider::RawCandle;
use std::collections::HashSet;

impl SyncEngine {
    /// Insert the newest candles of a batch that are not yet persisted, then trim the partition
    pub fn sync_historical(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        batch: Vec<RawCandle>,
    ) -> Result<SyncReport, PipelineError> {
        if batch.is_empty() {
            tracing::info!("{} {}: empty historical batch, nothing to sync", instrument_key, timeframe);
            return Ok(SyncReport::empty(instrument_key, timeframe));
        }

        let received = batch.len();
        let rows = newest_rows(instrument_key, timeframe, &batch, self.retention);
        let retention = self.retention;

        let mut inserted = 0;
        let mut trimmed = 0;

        self.repository.transaction(&mut |tx: &mut dyn MarketDataTx| {
            let persisted = tx.candle_timestamps(instrument_key, timeframe)?;
            let fresh: Vec<NewCandle> = rows
                .iter()
                .filter(|row| !persisted.contains(&row.timestamp))
                .cloned()
                .collect();

            inserted = if fresh.is_empty() { 0 } else { tx.insert_candles(&fresh)? };
            trimmed = tx.trim_partition(instrument_key, timeframe, retention)?;
            Ok(())
        })?;

        tracing::info!(
            "✅ {} {}: historical sync received={} inserted={} trimmed={}",
            instrument_key,
            timeframe,
            received,
            inserted,
            trimmed
        );

        Ok(SyncReport {
            instrument_key: instrument_key.to_string(),
            timeframe,
            received,
            inserted,
            updated: 0,
            trimmed,
        })
    }
}

/// UTC rows sorted newest first, one per timestamp, at most `keep` of them
fn newest_rows(instrument_key: &str, timeframe: Timeframe, batch: &[RawCandle], keep: usize) -> Vec<NewCandle> {
    let mut rows: Vec<NewCandle> = batch
        .iter()
        .map(|raw| NewCandle::from_raw(instrument_key, timeframe, raw))
        .collect();

    rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut seen = HashSet::with_capacity(rows.len());
    rows.retain(|row| seen.insert(row.timestamp));
    rows.truncate(keep);
    rows
}
