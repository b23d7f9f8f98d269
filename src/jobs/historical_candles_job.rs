use super::load_instrument_keys;
use crate::database::enums::Timeframe;
use crate::database::repositories::MarketDataRepository;
use crate::dispatch::{FetchDispatcher, FetchMode};
use crate::errors::PipelineError;
use crate::provider::HistoricalWindow;
use crate::scheduler::{CronFields, JobSpec, JobSummary, ScheduledJob, Scheduler, SchedulerError, Trigger};
use chrono::{FixedOffset, Utc};
use std::sync::Arc;

/// Historical 15m candle job
///
/// Loads the trailing window of completed candles for every instrument once a day
pub struct HistoricalCandlesJob {
    repository: Arc<dyn MarketDataRepository>,
    dispatcher: Arc<FetchDispatcher>,
    market_offset: FixedOffset,
    lookback_days: i64,
}

impl HistoricalCandlesJob {
    pub const NAME: &'static str = "load_historical_15m_candles";
    pub const TIMEFRAME: Timeframe = Timeframe::FifteenMinutes;

    pub fn new(
        repository: Arc<dyn MarketDataRepository>,
        dispatcher: Arc<FetchDispatcher>,
        market_offset: FixedOffset,
        lookback_days: i64,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            market_offset,
            lookback_days,
        }
    }
}

#[async_trait::async_trait]
impl ScheduledJob for HistoricalCandlesJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self) -> Result<JobSummary, PipelineError> {
        let window = HistoricalWindow::trailing(Utc::now(), self.market_offset, self.lookback_days);
        tracing::info!(
            "Starting historical {} candle load for {} to {}",
            Self::TIMEFRAME,
            window.from,
            window.to
        );

        let keys = load_instrument_keys(self.repository.clone()).await?;
        let report = self
            .dispatcher
            .dispatch(keys, Self::TIMEFRAME, FetchMode::Historical(window))
            .await;

        Ok(JobSummary::from(&report))
    }

    /// Schedule: 12:30 UTC Tuesday to Saturday, after the previous session has settled
    async fn schedule(self: Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        let spec = JobSpec::new(Self::NAME, scheduler.misfire_grace()).trigger(Trigger::Cron(
            CronFields::new().minute("30").hour("12").day_of_week("Tue-Sat"),
        ));
        scheduler.add_job(self, spec).await?;
        Ok(())
    }
}
