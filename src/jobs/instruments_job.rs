use crate::config::SnapshotConfig;
use crate::database::repositories::MarketDataRepository;
use crate::errors::PipelineError;
use crate::instruments::{load_snapshot_csv, InstrumentRegistry};
use crate::scheduler::{JobSpec, JobSummary, ScheduledJob, Scheduler, SchedulerError, Trigger};
use std::sync::Arc;
use std::time::Duration;

/// 26 weeks
const RELOAD_INTERVAL: Duration = Duration::from_secs(26 * 7 * 24 * 60 * 60);

/// Instrument table reconciliation job
///
/// Loads the snapshot CSV and reconciles the persisted instrument set with it
pub struct InstrumentsJob {
    repository: Arc<dyn MarketDataRepository>,
    snapshot: SnapshotConfig,
}

impl InstrumentsJob {
    pub const NAME: &'static str = "load_instruments_table";

    pub fn new(repository: Arc<dyn MarketDataRepository>, snapshot: SnapshotConfig) -> Self {
        Self { repository, snapshot }
    }
}

#[async_trait::async_trait]
impl ScheduledJob for InstrumentsJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self) -> Result<JobSummary, PipelineError> {
        tracing::info!("Starting instrument table reconciliation");

        let registry = InstrumentRegistry::new(self.repository.clone());
        let path = self.snapshot.csv_path.clone();
        let prefix = self.snapshot.key_prefix.clone();

        let report = tokio::task::spawn_blocking(move || {
            let candidates = load_snapshot_csv(&path, &prefix)?;
            registry.reconcile(&candidates)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("reconciliation task failed: {}", e)))??;

        Ok(JobSummary {
            processed: report.inserted + report.deleted + report.unchanged,
            skipped: 0,
            failed: 0,
        })
    }

    /// Schedule: every 26 weeks
    async fn schedule(self: Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        let spec = JobSpec::new(Self::NAME, scheduler.misfire_grace()).trigger(Trigger::Interval(RELOAD_INTERVAL));
        scheduler.add_job(self, spec).await?;
        Ok(())
    }
}
