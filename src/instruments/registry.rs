use crate::database::models::NewInstrument;
use crate::database::repositories::{MarketDataRepository, MarketDataTx};
use crate::errors::PipelineError;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Keeps the persisted instrument set equal to the latest snapshot
pub struct InstrumentRegistry {
    repository: Arc<dyn MarketDataRepository>,
}

impl InstrumentRegistry {
    pub fn new(repository: Arc<dyn MarketDataRepository>) -> Self {
        Self { repository }
    }

    /// Insert `candidate − persisted`, delete `persisted − candidate`, atomically
    ///
    /// Deleting an instrument deletes its candles. Instruments present on both
    /// sides are left as they are.
    pub fn reconcile(&self, candidates: &[NewInstrument]) -> Result<ReconcileReport, PipelineError> {
        if candidates.is_empty() {
            return Err(PipelineError::Configuration(
                "instrument snapshot is empty, refusing to reconcile".to_string(),
            ));
        }

        if let Some((row, field)) = candidates
            .iter()
            .find_map(|row| row.missing_field().map(|field| (row, field)))
        {
            return Err(PipelineError::Configuration(format!(
                "snapshot row {:?} has blank {}",
                row.instrument_key, field
            )));
        }

        // First occurrence of a key wins
        let mut candidate_keys = HashSet::with_capacity(candidates.len());
        let unique: Vec<&NewInstrument> = candidates
            .iter()
            .filter(|row| candidate_keys.insert(row.instrument_key.as_str()))
            .collect();
        if unique.len() < candidates.len() {
            tracing::warn!(
                "Snapshot contains {} duplicate instrument keys, keeping first occurrences",
                candidates.len() - unique.len()
            );
        }

        let mut report = ReconcileReport::default();

        self.repository.transaction(&mut |tx: &mut dyn MarketDataTx| {
            let persisted = tx.instrument_keys()?;

            let new_rows: Vec<NewInstrument> = unique
                .iter()
                .filter(|row| !persisted.contains(&row.instrument_key))
                .map(|row| (*row).clone())
                .collect();

            let mut stale: Vec<String> = persisted
                .iter()
                .filter(|key| !candidate_keys.contains(key.as_str()))
                .cloned()
                .collect();
            stale.sort();

            report.inserted = if new_rows.is_empty() { 0 } else { tx.insert_instruments(&new_rows)? };
            report.deleted = tx.delete_instruments(&stale)?;
            report.unchanged = unique.len() - new_rows.len();
            Ok(())
        })?;

        tracing::info!(
            "✅ Instruments reconciled: inserted={} deleted={} unchanged={}",
            report.inserted,
            report.deleted,
            report.unchanged
        );

        Ok(report)
    }
}
