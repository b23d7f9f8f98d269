//! Job scheduler
//!
//! Wraps `tokio-cron-scheduler` for trigger evaluation and adds:
//! - a shared pool bounding how many job bodies run at once
//! - at most one running instance per job name; overlapping firings are skipped
//! - a misfire grace: a firing that waited longer than that for a pool slot is discarded
//! - a warm-up run on registration
//! - a draining shutdown that lets in-flight runs finish

mod job;
mod trigger;

pub use job::{JobSummary, ScheduledJob};
pub use trigger::{CronFields, JobSpec, Trigger};

use crate::config::SchedulerConfig;
use crate::dispatch::pool::panic_message;
use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Cron scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// What happened to one firing
#[derive(Debug)]
pub enum FireOutcome {
    Completed(JobSummary),
    Failed(PipelineError),
    /// The previous run of the same job was still active
    SkippedRunning,
    /// Waited longer than the misfire grace for a pool slot
    Misfired { waited: Duration },
    /// The scheduler stopped accepting firings
    Rejected,
}

impl FireOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FireOutcome::Completed(_))
    }
}

struct SchedulerCore {
    pool: Arc<Semaphore>,
    pool_size: usize,
    running: DashMap<&'static str, DateTime<Utc>>,
    accepting: AtomicBool,
}

/// Removes the running marker even if the job body unwinds
struct RunningGuard<'a> {
    core: &'a SchedulerCore,
    name: &'static str,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.core.running.remove(self.name);
    }
}

impl SchedulerCore {
    async fn fire(&self, job: Arc<dyn ScheduledJob>, fired_at: Instant, grace: Duration) -> FireOutcome {
        let name = job.name();

        if !self.accepting.load(Ordering::SeqCst) {
            tracing::debug!("Job {} firing rejected, scheduler is shutting down", name);
            return FireOutcome::Rejected;
        }

        match self.running.entry(name) {
            Entry::Occupied(started) => {
                tracing::warn!(
                    "⏭️  Job {} still running since {}, skipping this firing",
                    name,
                    started.get()
                );
                return FireOutcome::SkippedRunning;
            }
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
            }
        }
        let _guard = RunningGuard { core: self, name };

        let Ok(_permit) = self.pool.clone().acquire_owned().await else {
            return FireOutcome::Rejected;
        };

        let waited = fired_at.elapsed();
        if waited > grace {
            tracing::warn!(
                "⏰ Job {} misfired: waited {:?} for a worker, grace is {:?}",
                name,
                waited,
                grace
            );
            return FireOutcome::Misfired { waited };
        }

        if !self.accepting.load(Ordering::SeqCst) {
            tracing::debug!("Job {} firing rejected, scheduler is shutting down", name);
            return FireOutcome::Rejected;
        }

        tracing::info!("▶️  Job {} started", name);
        let started = Instant::now();

        match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(Ok(summary)) => {
                tracing::info!("✅ Job {} completed in {:?}: {}", name, started.elapsed(), summary);
                FireOutcome::Completed(summary)
            }
            Ok(Err(e)) => {
                tracing::error!(kind = e.kind(), "❌ Job {} failed: {}", name, e);
                FireOutcome::Failed(e)
            }
            Err(payload) => {
                let panic = panic_message(payload);
                tracing::error!("❌ Job {} panicked: {}", name, panic);
                FireOutcome::Failed(PipelineError::Internal(panic.to_string()))
            }
        }
    }
}

/// Owns the cron engine and the job pool; built and stopped by the composition root
pub struct Scheduler {
    inner: JobScheduler,
    core: Arc<SchedulerCore>,
    misfire_grace: Duration,
}

impl Scheduler {
    pub async fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let inner = JobScheduler::new().await?;
        let pool_size = config.pool_size.max(1);

        Ok(Self {
            inner,
            core: Arc::new(SchedulerCore {
                pool: Arc::new(Semaphore::new(pool_size)),
                pool_size,
                running: DashMap::new(),
                accepting: AtomicBool::new(true),
            }),
            misfire_grace: config.misfire_grace(),
        })
    }

    /// Default misfire grace for jobs that don't set their own
    pub fn misfire_grace(&self) -> Duration {
        self.misfire_grace
    }

    /// Start evaluating triggers
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.inner.start().await?;
        tracing::info!("✅ Scheduler started with {} workers", self.core.pool_size);
        Ok(())
    }

    /// Attach one cron/interval job per trigger in `spec`
    pub async fn add_job(&self, job: Arc<dyn ScheduledJob>, spec: JobSpec) -> Result<Vec<Uuid>, SchedulerError> {
        if !self.core.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let mut ids = Vec::with_capacity(spec.triggers.len());
        for trigger in &spec.triggers {
            let core = self.core.clone();
            let job = job.clone();
            let grace = spec.misfire_grace;

            let on_fire = move |_uuid: Uuid, _lock: JobScheduler| {
                let core = core.clone();
                let job = job.clone();
                Box::pin(async move {
                    core.fire(job, Instant::now(), grace).await;
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            };

            let cron_job = match trigger {
                Trigger::Cron(fields) => Job::new_async(fields.expression().as_str(), on_fire)?,
                Trigger::Interval(every) => Job::new_repeated_async(*every, on_fire)?,
            };

            ids.push(self.inner.add(cron_job).await?);
            tracing::info!("⏰ Job {} scheduled: {}", spec.id, trigger);
        }

        Ok(ids)
    }

    /// Schedule a job and run it once right away, waiting for that first run
    pub async fn register(&self, job: Arc<dyn ScheduledJob>) -> Result<FireOutcome, SchedulerError> {
        job.clone().schedule(self).await?;
        Ok(self.run_now(job).await)
    }

    /// Fire a job outside its triggers, through the same pool and guard
    pub async fn run_now(&self, job: Arc<dyn ScheduledJob>) -> FireOutcome {
        self.core.fire(job, Instant::now(), self.misfire_grace).await
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.core.running.contains_key(name)
    }

    /// Stop the cron engine, reject new firings, then wait for in-flight runs
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.core.accepting.store(false, Ordering::SeqCst);
        tracing::info!("🛑 Scheduler shutting down, draining running jobs...");

        let mut inner = self.inner.clone();
        if let Err(e) = inner.shutdown().await {
            tracing::warn!("Cron engine shutdown reported an error: {}", e);
        }

        // Every permit back means nothing is running
        let drained = self.core.pool.acquire_many(self.core.pool_size as u32).await;
        self.core.pool.close();
        drop(drained);

        tracing::info!("✅ Scheduler stopped");
        Ok(())
    }

    #[cfg(test)]
    async fn fire_with_grace(&self, job: Arc<dyn ScheduledJob>, grace: Duration) -> FireOutcome {
        self.core.fire(job, Instant::now(), grace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct TestJob {
        name: &'static str,
        behavior: Behavior,
        duration: Duration,
        runs: AtomicUsize,
        finished: AtomicUsize,
        interval: Option<Duration>,
        cron: Option<CronFields>,
    }

    impl TestJob {
        fn new(name: &'static str, behavior: Behavior, duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                duration,
                runs: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                interval: None,
                cron: None,
            })
        }

        fn every(name: &'static str, behavior: Behavior, interval: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                duration: Duration::ZERO,
                runs: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                interval: Some(interval),
                cron: None,
            })
        }

        fn on_cron(name: &'static str, fields: CronFields) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior: Behavior::Succeed,
                duration: Duration::ZERO,
                runs: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                interval: None,
                cron: Some(fields),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ScheduledJob for TestJob {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self) -> Result<JobSummary, PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(JobSummary {
                    processed: 1,
                    ..JobSummary::default()
                }),
                Behavior::Fail => Err(PipelineError::ProviderLogical("scripted failure".to_string())),
                Behavior::Panic => panic!("scripted panic"),
            }
        }

        async fn schedule(self: Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
            let mut spec = JobSpec::new(self.name, scheduler.misfire_grace());
            if let Some(every) = self.interval {
                spec = spec.trigger(Trigger::Interval(every));
            }
            if let Some(fields) = &self.cron {
                spec = spec.trigger(Trigger::Cron(fields.clone()));
            }
            scheduler.add_job(self, spec).await?;
            Ok(())
        }
    }

    async fn scheduler(pool_size: usize) -> Scheduler {
        Scheduler::new(&SchedulerConfig {
            pool_size,
            misfire_grace_secs: 120,
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_register_runs_warm_up() {
        let scheduler = scheduler(2).await;
        let job = TestJob::new("warm_up", Behavior::Succeed, Duration::ZERO);

        let outcome = scheduler.register(job.clone()).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_firing_is_skipped() {
        let scheduler = Arc::new(scheduler(4).await);
        let job = TestJob::new("slow", Behavior::Succeed, Duration::from_millis(200));

        let first = {
            let scheduler = scheduler.clone();
            let job = job.clone();
            tokio::spawn(async move { scheduler.run_now(job).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_running("slow"));

        let second = scheduler.run_now(job.clone()).await;

        assert!(matches!(second, FireOutcome::SkippedRunning));
        assert!(first.await.unwrap().is_completed());
        assert_eq!(job.runs(), 1);
        assert!(!scheduler.is_running("slow"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_firing_beyond_grace_is_discarded() {
        let scheduler = Arc::new(scheduler(1).await);
        let blocker = TestJob::new("blocker", Behavior::Succeed, Duration::from_millis(300));
        let late = TestJob::new("late", Behavior::Succeed, Duration::ZERO);

        let running = {
            let scheduler = scheduler.clone();
            let blocker = blocker.clone();
            tokio::spawn(async move { scheduler.run_now(blocker).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = scheduler.fire_with_grace(late.clone(), Duration::from_millis(100)).await;

        assert!(matches!(outcome, FireOutcome::Misfired { .. }));
        assert_eq!(late.runs(), 0);
        assert!(running.await.unwrap().is_completed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_and_panics_are_contained() {
        let scheduler = scheduler(2).await;
        let failing = TestJob::new("failing", Behavior::Fail, Duration::ZERO);
        let panicking = TestJob::new("panicking", Behavior::Panic, Duration::ZERO);

        assert!(matches!(
            scheduler.run_now(failing.clone()).await,
            FireOutcome::Failed(PipelineError::ProviderLogical(_))
        ));
        assert!(matches!(
            scheduler.run_now(panicking.clone()).await,
            FireOutcome::Failed(PipelineError::Internal(_))
        ));

        // The guard was released, so the job can fire again
        assert!(!scheduler.is_running("panicking"));
        assert!(matches!(scheduler.run_now(failing.clone()).await, FireOutcome::Failed(_)));
        assert_eq!(failing.runs(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_job_keeps_firing() {
        let scheduler = scheduler(2).await;
        let job = TestJob::every("flaky", Behavior::Fail, Duration::from_secs(1));

        scheduler.register(job.clone()).await.unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2600)).await;
        scheduler.shutdown().await.unwrap();

        // Warm-up plus at least one triggered run after a failure
        assert!(job.runs() >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cron_trigger_fires() {
        let scheduler = scheduler(2).await;
        let job = TestJob::on_cron("every_second", CronFields::new().second("*"));

        let warm_up = scheduler.register(job.clone()).await.unwrap();
        assert!(warm_up.is_completed());

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2600)).await;
        scheduler.shutdown().await.unwrap();

        // Warm-up plus at least one cron firing
        assert!(job.finished() >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_drains_and_rejects() {
        let scheduler = Arc::new(scheduler(2).await);
        scheduler.start().await.unwrap();
        let job = TestJob::new("draining", Behavior::Succeed, Duration::from_millis(200));

        let in_flight = {
            let scheduler = scheduler.clone();
            let job = job.clone();
            tokio::spawn(async move { scheduler.run_now(job).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        scheduler.shutdown().await.unwrap();

        assert_eq!(job.finished(), 1);
        assert!(in_flight.await.unwrap().is_completed());
        assert!(matches!(scheduler.run_now(job.clone()).await, FireOutcome::Rejected));

        let other = TestJob::new("after_shutdown", Behavior::Succeed, Duration::ZERO);
        assert!(matches!(
            scheduler.add_job(other, JobSpec::new("after_shutdown", Duration::from_secs(1))).await,
            Err(SchedulerError::ShuttingDown)
        ));
    }
}
