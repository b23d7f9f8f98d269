use super::load_instrument_keys;
use crate::database::enums::Timeframe;
use crate::database::repositories::MarketDataRepository;
use crate::dispatch::{FetchDispatcher, FetchMode};
use crate::errors::PipelineError;
use crate::scheduler::{CronFields, JobSpec, JobSummary, ScheduledJob, Scheduler, SchedulerError, Trigger};
use std::sync::Arc;

/// Intraday 15m candle job
///
/// Refreshes the current session's candles two minutes after each 15m bucket closes
pub struct IntradayCandlesJob {
    repository: Arc<dyn MarketDataRepository>,
    dispatcher: Arc<FetchDispatcher>,
}

impl IntradayCandlesJob {
    pub const NAME: &'static str = "load_intraday_15m_candles";
    pub const TIMEFRAME: Timeframe = Timeframe::FifteenMinutes;

    pub fn new(repository: Arc<dyn MarketDataRepository>, dispatcher: Arc<FetchDispatcher>) -> Self {
        Self { repository, dispatcher }
    }

    /// NSE session 09:15-15:30 IST is 03:45-10:00 UTC
    fn triggers() -> Vec<Trigger> {
        vec![
            Trigger::Cron(CronFields::new().minute("47").hour("3").day_of_week("Mon-Fri")),
            Trigger::Cron(CronFields::new().minute("2,17,32,47").hour("4-9").day_of_week("Mon-Fri")),
            Trigger::Cron(CronFields::new().minute("2").hour("10").day_of_week("Mon-Fri")),
        ]
    }
}

#[async_trait::async_trait]
impl ScheduledJob for IntradayCandlesJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self) -> Result<JobSummary, PipelineError> {
        tracing::info!("Starting intraday {} candle refresh", Self::TIMEFRAME);

        let keys = load_instrument_keys(self.repository.clone()).await?;
        let report = self
            .dispatcher
            .dispatch(keys, Self::TIMEFRAME, FetchMode::Intraday)
            .await;

        Ok(JobSummary::from(&report))
    }

    async fn schedule(self: Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        let spec = Self::triggers()
            .into_iter()
            .fold(JobSpec::new(Self::NAME, scheduler.misfire_grace()), JobSpec::trigger);
        scheduler.add_job(self, spec).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::database::models::NewInstrument;
    use crate::database::repositories::InMemoryMarketDataRepository;
    use crate::provider::mock::{generate_candles, MockBehavior, MockCandleProvider};
    use crate::sync::SyncEngine;

    fn setup() -> (Arc<InMemoryMarketDataRepository>, Arc<MockCandleProvider>, IntradayCandlesJob) {
        let repository = Arc::new(InMemoryMarketDataRepository::with_instruments(vec![
            NewInstrument::new("NSE_EQ|X", "X Ltd.", "Metals & Mining"),
            NewInstrument::new("NSE_EQ|Y", "Y Ltd.", "Metals & Mining"),
        ]));
        let provider = Arc::new(MockCandleProvider::new());
        let engine = Arc::new(SyncEngine::new(repository.clone(), 100, true));
        let dispatcher = Arc::new(FetchDispatcher::new(provider.clone(), engine, 20, 100));
        let job = IntradayCandlesJob::new(repository.clone(), dispatcher);
        (repository, provider, job)
    }

    #[test]
    fn test_triggers_cover_session() {
        let expressions: Vec<String> = IntradayCandlesJob::triggers()
            .iter()
            .map(|t| t.to_string())
            .collect();

        assert_eq!(
            expressions,
            vec![
                "cron '0 47 3 * * Mon-Fri' UTC",
                "cron '0 2,17,32,47 4-9 * * Mon-Fri' UTC",
                "cron '0 2 10 * * Mon-Fri' UTC",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_isolates_failures() {
        let (repository, provider, job) = setup();
        provider.set("NSE_EQ|X", MockBehavior::Transport("connection reset".to_string()));
        provider.set("NSE_EQ|Y", MockBehavior::Candles(generate_candles(12, 15)));

        let summary = job.run().await.unwrap();

        assert_eq!(summary, JobSummary { processed: 1, skipped: 0, failed: 1 });
        assert_eq!(repository.count_candles("NSE_EQ|Y", Timeframe::FifteenMinutes).unwrap(), 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_schedule() {
        let scheduler = Scheduler::new(&SchedulerConfig::default()).await.unwrap();
        let (_, _, job) = setup();

        assert!(Arc::new(job).schedule(&scheduler).await.is_ok());
    }
}
