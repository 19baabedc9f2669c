//! Job orchestration: lease acquisition, window selection, bounded task
//! fan-out and the commit path.
//!
//! A periodic host calls [`JobManager::trigger`]. Each trigger holds the
//! store lease for its whole duration, so execution is serialized across
//! processes even though tasks run in parallel within one trigger.
//!
//! # Commit ordering
//!
//! The finalize path is `update_job` (final counts) → `commit_job_data`
//! (output + watermark, idempotent) → persist `Succeeded` → `complete_job`
//! (archive). A crash between commit and archive is recovered on the next
//! trigger: the active job loads as `Succeeded` and is archived without
//! opening a new window.
//!
//! # Cancellation
//!
//! Tasks and progress writes observe a child of the caller's token. After a
//! clean fan-out the child is cancelled so late progress writes drop instead
//! of trailing the final commit; the commit itself answers only to the
//! caller's token.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::catalog::ResourceTypeCatalog;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{LakesyncError, Result};
use crate::executor::{ProgressSink, TaskContext, TaskExecutor, TaskResult};
use crate::scheduler::job::{DataPeriod, Job, JobStatus};
use crate::store::JobStore;

/// Schedules time-windowed extraction jobs and coordinates their tasks.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn TaskExecutor>,
    catalog: Arc<dyn ResourceTypeCatalog>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn TaskExecutor>,
        catalog: Arc<dyn ResourceTypeCatalog>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            catalog,
            clock,
            config,
        }
    }

    /// Run one scheduling pass: resume or create the active job, execute it
    /// and commit its window.
    ///
    /// Lease contention is not an error; the call logs and returns so the
    /// next periodic trigger can retry. The lease is released on every exit
    /// path.
    pub async fn trigger(&self, cancel: CancellationToken) -> Result<()> {
        match self.store.acquire_lease().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Job lease held elsewhere, skipping trigger");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire job lease, skipping trigger");
                return Ok(());
            }
        }

        let outcome = self.run_leased(&cancel).await;

        if let Err(e) = self.store.release_lease().await {
            tracing::warn!(error = %e, "Failed to release job lease");
        }
        outcome
    }

    async fn run_leased(&self, cancel: &CancellationToken) -> Result<()> {
        let active = self.store.get_active_jobs().await?;
        let job = match active.into_iter().next() {
            Some(job) if job.status == JobStatus::Succeeded => {
                // Crash between commit and archive; finish the archive and
                // leave the next window for the next trigger.
                tracing::info!(job_id = %job.id, "Archiving job that already committed");
                return self.store.complete_job(&job).await;
            }
            Some(mut job) => {
                tracing::info!(job_id = %job.id, status = %job.status, "Resuming active job");
                job.status = JobStatus::Running;
                job.failed_reason = None;
                self.store.update_job(&job).await?;
                job
            }
            None => {
                let mut job = self.create_job().await?;
                job.status = JobStatus::Running;
                self.store.update_job(&job).await?;
                job
            }
        };
        self.execute(job, cancel).await
    }

    /// Open the next data window from the persisted watermark.
    async fn create_job(&self) -> Result<Job> {
        let metadata = self
            .store
            .get_scheduler_metadata()
            .await?
            .unwrap_or_default();
        let trigger_start = metadata
            .last_scheduled_timestamp
            .unwrap_or(self.config.start_time);

        if let Some(end_time) = self.config.end_time {
            if trigger_start >= end_time {
                return Err(LakesyncError::StartJobFailed("scheduled to end".to_string()));
            }
        }

        let now = self.clock.now();
        let mut trigger_end = now - self.config.query_latency();
        if let Some(end_time) = self.config.end_time {
            trigger_end = trigger_end.min(end_time);
        }
        if trigger_start >= trigger_end {
            return Err(LakesyncError::StartJobFailed(
                "start is in the future".to_string(),
            ));
        }

        let resource_types = if self.config.resource_type_filters.is_empty() {
            self.catalog.get_all().await?
        } else {
            self.config.resource_type_filters.clone()
        };
        if resource_types.is_empty() {
            return Err(LakesyncError::StartJobFailed(
                "no resource types to process".to_string(),
            ));
        }

        let job = Job::new(
            self.config.container_name.clone(),
            resource_types,
            DataPeriod::new(trigger_start, trigger_end),
            now,
        );
        self.store.update_job(&job).await?;
        tracing::info!(
            job_id = %job.id,
            start = %job.data_period.start,
            end = %job.data_period.end,
            resource_types = job.resource_types.len(),
            "Created job"
        );
        Ok(job)
    }

    async fn execute(&self, job: Job, cancel: &CancellationToken) -> Result<()> {
        let execution_token = cancel.child_token();
        let shared = Arc::new(SharedJob::new(job));
        let sink: Arc<dyn ProgressSink> = Arc::new(JobProgressSink {
            shared: shared.clone(),
            store: self.store.clone(),
            token: execution_token.clone(),
        });

        let outcome = self.run_tasks(&shared, &sink, &execution_token).await;
        // Late progress writes stop here; on success this is what lets the
        // final commit run without queueing behind them.
        execution_token.cancel();

        match outcome {
            Ok(()) => self.finalize(&shared).await,
            Err(_) if cancel.is_cancelled() => {
                // The job stays Running durably; the next trigger resumes it.
                tracing::info!("Trigger cancelled, leaving job for the next trigger");
                Err(LakesyncError::Cancelled)
            }
            Err(e) => {
                let snapshot = {
                    let mut job = shared.lock_job()?;
                    job.status = JobStatus::Failed;
                    job.failed_reason = Some(e.to_string());
                    job.clone()
                };
                if let Err(persist) = self.store.update_job(&snapshot).await {
                    tracing::error!(
                        job_id = %snapshot.id,
                        error = %persist,
                        "Failed to persist failed job"
                    );
                }
                tracing::error!(job_id = %snapshot.id, error = %e, "Job failed");
                Err(e)
            }
        }
    }

    /// Fan tasks out over the job's resource types under the concurrency
    /// cap, folding each terminal result as it finishes.
    async fn run_tasks(
        &self,
        shared: &Arc<SharedJob>,
        sink: &Arc<dyn ProgressSink>,
        execution_token: &CancellationToken,
    ) -> Result<()> {
        let resource_types = shared.lock_job()?.resource_types.clone();

        let mut inflight: JoinSet<Result<TaskResult>> = JoinSet::new();
        let mut failure: Option<LakesyncError> = None;

        for resource_type in resource_types {
            let context = shared.lock_job()?.task_context(&resource_type);
            if context.is_completed {
                tracing::debug!(resource_type = %resource_type, "Resource type already drained, skipping");
                continue;
            }

            // First-finish draining: free a slot before submitting when the
            // cap is reached. A failed task stops all further submission.
            while inflight.len() >= self.config.max_concurrency {
                let Some(joined) = inflight.join_next().await else {
                    break;
                };
                if let Err(e) = self.fold_joined(shared, execution_token, joined).await {
                    execution_token.cancel();
                    failure = Some(e);
                    break;
                }
            }
            if failure.is_some() {
                break;
            }

            let executor = self.executor.clone();
            let task_sink = sink.clone();
            let task_token = execution_token.clone();
            tracing::debug!(resource_type = %context.resource_type, "Submitting task");
            inflight.spawn(async move { executor.execute(context, task_sink, task_token).await });
        }

        while let Some(joined) = inflight.join_next().await {
            if let Err(e) = self.fold_joined(shared, execution_token, joined).await {
                execution_token.cancel();
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fold one finished task into the job and persist the snapshot.
    async fn fold_joined(
        &self,
        shared: &Arc<SharedJob>,
        execution_token: &CancellationToken,
        joined: std::result::Result<Result<TaskResult>, tokio::task::JoinError>,
    ) -> Result<()> {
        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(LakesyncError::ExecuteTaskFailed(e.to_string())),
            Err(e) => {
                return Err(LakesyncError::ExecuteTaskFailed(format!(
                    "task aborted: {e}"
                )))
            }
        };

        let snapshot = {
            let mut job = shared.lock_job()?;
            job.apply_result(&result);
            job.clone()
        };
        tracing::debug!(
            resource_type = %result.resource_type,
            completed = result.is_completed,
            processed = result.processed_count,
            "Task finished"
        );
        shared
            .persist(self.store.as_ref(), &snapshot, execution_token)
            .await
            .map_err(|e| LakesyncError::ExecuteTaskFailed(e.to_string()))
    }

    /// Commit the window and archive the job.
    ///
    /// Errors here deliberately leave the job un-failed: the window is
    /// recovered by re-running the (idempotent) commit on the next trigger.
    async fn finalize(&self, shared: &Arc<SharedJob>) -> Result<()> {
        let snapshot = shared.lock_job()?.clone();
        self.store.update_job(&snapshot).await?;
        self.store.commit_job_data(&snapshot).await?;

        let snapshot = {
            let mut job = shared.lock_job()?;
            job.status = JobStatus::Succeeded;
            job.clone()
        };
        self.store.update_job(&snapshot).await?;
        self.store.complete_job(&snapshot).await?;
        tracing::info!(
            job_id = %snapshot.id,
            watermark = %snapshot.data_period.end,
            "Job committed"
        );
        Ok(())
    }
}

/// Job state shared between the orchestrator, progress callbacks and result
/// folds.
///
/// Field writes happen under the job mutex; durable writes go through the
/// async write gate so snapshots reach the store in order, and never while
/// the mutex is held.
struct SharedJob {
    job: Mutex<Job>,
    write_gate: tokio::sync::Mutex<()>,
}

impl SharedJob {
    fn new(job: Job) -> Self {
        Self {
            job: Mutex::new(job),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_job(&self) -> Result<MutexGuard<'_, Job>> {
        self.job
            .lock()
            .map_err(|_| LakesyncError::Internal("job state mutex poisoned".to_string()))
    }

    /// Serialized durable write of a job snapshot, dropped once `token` is
    /// cancelled so late writes cannot trail the final commit.
    async fn persist(
        &self,
        store: &dyn JobStore,
        snapshot: &Job,
        token: &CancellationToken,
    ) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        if token.is_cancelled() {
            return Ok(());
        }
        tokio::select! {
            _ = token.cancelled() => Ok(()),
            result = store.update_job(snapshot) => result,
        }
    }
}

/// Sink handed to executors; folds checkpoints into the shared job and
/// persists them.
struct JobProgressSink {
    shared: Arc<SharedJob>,
    store: Arc<dyn JobStore>,
    token: CancellationToken,
}

#[async_trait]
impl ProgressSink for JobProgressSink {
    async fn report(&self, context: TaskContext) -> Result<()> {
        let snapshot = {
            let mut job = self.shared.lock_job()?;
            if !job.apply_progress(&context) {
                tracing::debug!(
                    resource_type = %context.resource_type,
                    "Dropping progress report for completed resource type"
                );
                return Ok(());
            }
            job.clone()
        };
        self.shared
            .persist(self.store.as_ref(), &snapshot, &self.token)
            .await
    }
}
