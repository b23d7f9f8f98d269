//! Per-instrument fetch-and-sync fan-out
//!
//! Each instrument runs `Fetching → Syncing` on its own task inside a
//! [`BoundedPool`]. Failures are recorded per instrument and never cancel
//! sibling pipelines.

pub mod pool;

pub use pool::{BoundedPool, TaskPanic};

use crate::database::enums::Timeframe;
use crate::errors::{PipelineError, PipelineFailure};
use crate::provider::{CandleProvider, HistoricalWindow, ProviderResponse, RawCandle};
use crate::sync::{SyncEngine, SyncReport};
use serde::Serialize;
use std::sync::Arc;

/// Which provider endpoint and sync path a dispatch uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Historical(HistoricalWindow),
    Intraday,
}

impl FetchMode {
    pub fn label(&self) -> &'static str {
        match self {
            FetchMode::Historical(_) => "historical",
            FetchMode::Intraday => "intraday",
        }
    }
}

/// Why an instrument was skipped without a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    InsufficientData { received: usize, required: usize },
}

/// Successful end state of one instrument pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    Synced(SyncReport),
    Skipped(SkipReason),
}

#[derive(Debug)]
pub struct InstrumentOutcome {
    pub instrument_key: String,
    pub result: Result<SyncOutcome, PipelineFailure>,
}

/// Per-instrument outcomes of one dispatch, in input order
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<InstrumentOutcome>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn synced(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(SyncOutcome::Synced(_))))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(SyncOutcome::Skipped(_))))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Outcome recorded for one instrument
    pub fn outcome(&self, instrument_key: &str) -> Option<&InstrumentOutcome> {
        self.outcomes.iter().find(|o| o.instrument_key == instrument_key)
    }
}

/// Fans a fetch operation out over instruments and hands each batch to the [`SyncEngine`]
pub struct FetchDispatcher {
    provider: Arc<dyn CandleProvider>,
    engine: Arc<SyncEngine>,
    pool: BoundedPool,
    min_historical_candles: usize,
}

impl FetchDispatcher {
    pub fn new(
        provider: Arc<dyn CandleProvider>,
        engine: Arc<SyncEngine>,
        max_workers: usize,
        min_historical_candles: usize,
    ) -> Self {
        Self {
            provider,
            engine,
            pool: BoundedPool::new(max_workers),
            min_historical_candles,
        }
    }

    /// Fetch and sync every instrument, waiting for all of them
    pub async fn dispatch(
        &self,
        instrument_keys: Vec<String>,
        timeframe: Timeframe,
        mode: FetchMode,
    ) -> DispatchReport {
        if instrument_keys.is_empty() {
            tracing::info!("No instruments to {} fetch for {}", mode.label(), timeframe);
            return DispatchReport::default();
        }

        tracing::info!(
            "🚀 Dispatching {} {} fetches for {} on {} workers",
            instrument_keys.len(),
            mode.label(),
            timeframe,
            self.pool.size_for(instrument_keys.len())
        );

        let results = self
            .pool
            .run(instrument_keys.clone(), |instrument_key| {
                let pipeline = Pipeline {
                    provider: self.provider.clone(),
                    engine: self.engine.clone(),
                    min_historical_candles: self.min_historical_candles,
                    timeframe,
                    mode,
                };
                async move { pipeline.run(instrument_key).await }
            })
            .await;

        let outcomes: Vec<InstrumentOutcome> = instrument_keys
            .into_iter()
            .zip(results)
            .map(|(instrument_key, joined)| {
                let result = joined.unwrap_or_else(|panic| {
                    Err(PipelineFailure::fetch(PipelineError::Internal(panic.to_string())))
                });
                if let Err(failure) = &result {
                    tracing::error!(
                        instrument_key = %instrument_key,
                        timeframe = %timeframe,
                        stage = %failure.stage,
                        kind = failure.error.kind(),
                        "❌ {} {} failed: {}",
                        instrument_key,
                        timeframe,
                        failure
                    );
                }
                InstrumentOutcome { instrument_key, result }
            })
            .collect();

        let report = DispatchReport { outcomes };
        tracing::info!(
            "✅ {} {} dispatch finished: synced={} skipped={} failed={}",
            mode.label(),
            timeframe,
            report.synced(),
            report.skipped(),
            report.failed()
        );
        report
    }
}

/// Everything one instrument task needs, owned so the task is `'static`
struct Pipeline {
    provider: Arc<dyn CandleProvider>,
    engine: Arc<SyncEngine>,
    min_historical_candles: usize,
    timeframe: Timeframe,
    mode: FetchMode,
}

impl Pipeline {
    async fn run(self, instrument_key: String) -> Result<SyncOutcome, PipelineFailure> {
        let candles = self.fetch(&instrument_key).await.map_err(PipelineFailure::fetch)?;

        if let FetchMode::Historical(_) = self.mode {
            if candles.len() < self.min_historical_candles {
                tracing::warn!(
                    "⚠️  {} {}: expected at least {} candles, got {}; skipping",
                    instrument_key,
                    self.timeframe,
                    self.min_historical_candles,
                    candles.len()
                );
                return Ok(SyncOutcome::Skipped(SkipReason::InsufficientData {
                    received: candles.len(),
                    required: self.min_historical_candles,
                }));
            }
        }

        let report = self.sync(instrument_key, candles).await.map_err(PipelineFailure::sync)?;
        Ok(SyncOutcome::Synced(report))
    }

    async fn fetch(&self, instrument_key: &str) -> Result<Vec<RawCandle>, PipelineError> {
        let response: ProviderResponse = match &self.mode {
            FetchMode::Historical(window) => {
                self.provider
                    .fetch_historical(instrument_key, self.timeframe, window)
                    .await?
            }
            FetchMode::Intraday => self.provider.fetch_intraday(instrument_key, self.timeframe).await?,
        };

        response.into_candles()
    }

    async fn sync(&self, instrument_key: String, candles: Vec<RawCandle>) -> Result<SyncReport, PipelineError> {
        let engine = self.engine.clone();
        let timeframe = self.timeframe;
        let mode = self.mode;

        tokio::task::spawn_blocking(move || match mode {
            FetchMode::Historical(_) => engine.sync_historical(&instrument_key, timeframe, candles),
            FetchMode::Intraday => engine.sync_intraday(&instrument_key, timeframe, candles),
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("sync task failed: {}", e)))?
    }
}
