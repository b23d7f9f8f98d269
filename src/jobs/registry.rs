use super::{HistoricalCandlesJob, InstrumentsJob, IntradayCandlesJob};
use crate::config::{IngestionConfig, SnapshotConfig};
use crate::database::repositories::MarketDataRepository;
use crate::dispatch::FetchDispatcher;
use crate::errors::PipelineError;
use crate::scheduler::ScheduledJob;
use std::sync::Arc;

/// Shared dependencies handed to every job
#[derive(Clone)]
pub struct JobContext {
    pub repository: Arc<dyn MarketDataRepository>,
    pub dispatcher: Arc<FetchDispatcher>,
    pub ingestion: IngestionConfig,
    pub snapshot: SnapshotConfig,
}

/// Jobs in registration order: instruments first so candle jobs see them on warm-up
pub fn build_jobs(context: &JobContext) -> Result<Vec<Arc<dyn ScheduledJob>>, PipelineError> {
    let market_offset = context
        .ingestion
        .market_offset()
        .map_err(|e| PipelineError::Configuration(e.to_string()))?;

    let instruments: Arc<dyn ScheduledJob> =
        Arc::new(InstrumentsJob::new(context.repository.clone(), context.snapshot.clone()));
    let historical: Arc<dyn ScheduledJob> = Arc::new(HistoricalCandlesJob::new(
        context.repository.clone(),
        context.dispatcher.clone(),
        market_offset,
        context.ingestion.historical_lookback_days,
    ));
    let intraday: Arc<dyn ScheduledJob> = Arc::new(IntradayCandlesJob::new(
        context.repository.clone(),
        context.dispatcher.clone(),
    ));

    Ok(vec![instruments, historical, intraday])
}
