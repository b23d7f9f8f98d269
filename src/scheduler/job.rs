use super::{Scheduler, SchedulerError};
use crate::errors::PipelineError;
use std::fmt;
use std::sync::Arc;

/// Counts a job run reports back to the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} skipped={} failed={}",
            self.processed, self.skipped, self.failed
        )
    }
}

/// A unit of scheduled work
///
/// `run` executes one pass; `schedule` registers the job's triggers.
/// The scheduler never runs two passes of the same `name` at once.
#[async_trait::async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<JobSummary, PipelineError>;

    async fn schedule(self: Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError>;
}
