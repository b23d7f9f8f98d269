/// Scheduled jobs
///
/// Contains the background jobs registered at startup, in this order:
/// - Instrument table reconciliation from the snapshot CSV
/// - Historical 15m candle load after market close
/// - Intraday 15m candle refresh during market hours

pub mod historical_candles_job;
pub mod instruments_job;
pub mod intraday_candles_job;
pub mod registry;

pub use historical_candles_job::HistoricalCandlesJob;
pub use instruments_job::InstrumentsJob;
pub use intraday_candles_job::IntradayCandlesJob;
pub use registry::{build_jobs, JobContext};

use crate::database::repositories::MarketDataRepository;
use crate::dispatch::DispatchReport;
use crate::errors::PipelineError;
use crate::scheduler::JobSummary;
use std::sync::Arc;

/// Read every persisted instrument key off the async runtime
async fn load_instrument_keys(repository: Arc<dyn MarketDataRepository>) -> Result<Vec<String>, PipelineError> {
    tokio::task::spawn_blocking(move || repository.get_instrument_keys())
        .await
        .map_err(|e| PipelineError::Internal(format!("instrument lookup task failed: {}", e)))?
        .map_err(PipelineError::from)
}

impl From<&DispatchReport> for JobSummary {
    fn from(report: &DispatchReport) -> Self {
        JobSummary {
            processed: report.synced(),
            skipped: report.skipped(),
            failed: report.failed(),
        }
    }
}
