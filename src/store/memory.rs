//! In-process job store used by tests and single-node embeddings.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{LakesyncError, Result};
use crate::scheduler::job::{DataPeriod, Job, JobStatus, SchedulerMetadata};

use super::JobStore;

const DEFAULT_LEASE_TTL_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct LeaseRecord {
    holder_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreInner {
    active: BTreeMap<Uuid, Job>,
    completed: BTreeMap<Uuid, Job>,
    failed: BTreeMap<Uuid, Job>,
    metadata: Option<SchedulerMetadata>,
    lease: Option<LeaseRecord>,
    committed_periods: Vec<DataPeriod>,
}

/// Job store over shared process memory with a TTL-bound advisory lease.
///
/// Cloning shares both the backing state and the holder identity. Use
/// [`MemoryJobStore::handle`] for a second session over the same state with
/// its own identity; a crashed holder's lease expires after the TTL.
#[derive(Clone)]
pub struct MemoryJobStore {
    inner: Arc<Mutex<StoreInner>>,
    holder_id: Uuid,
    lease_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            holder_id: Uuid::new_v4(),
            lease_ttl: Duration::seconds(DEFAULT_LEASE_TTL_SECS),
            clock,
        }
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Derive a handle over the same backing state with its own lease
    /// identity, as a separate process would have.
    pub fn handle(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            holder_id: Uuid::new_v4(),
            lease_ttl: self.lease_ttl,
            clock: self.clock.clone(),
        }
    }

    /// Windows committed so far, oldest first.
    pub fn committed_periods(&self) -> Result<Vec<DataPeriod>> {
        Ok(self.lock()?.committed_periods.clone())
    }

    /// Archived jobs that succeeded, ordered by creation time.
    pub fn completed_jobs(&self) -> Result<Vec<Job>> {
        let inner = self.lock()?;
        let mut jobs: Vec<Job> = inner.completed.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Archived jobs that failed, ordered by creation time.
    pub fn failed_jobs(&self) -> Result<Vec<Job>> {
        let inner = self.lock()?;
        let mut jobs: Vec<Job> = inner.failed.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| LakesyncError::StoreUnavailable("store mutex poisoned".to_string()))
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn acquire_lease(&self) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        match &inner.lease {
            Some(lease) if lease.holder_id != self.holder_id && lease.expires_at > now => Ok(false),
            _ => {
                inner.lease = Some(LeaseRecord {
                    holder_id: self.holder_id,
                    expires_at: now + self.lease_ttl,
                });
                Ok(true)
            }
        }
    }

    async fn release_lease(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner
            .lease
            .as_ref()
            .is_some_and(|lease| lease.holder_id == self.holder_id)
        {
            inner.lease = None;
        }
        Ok(())
    }

    async fn get_scheduler_metadata(&self) -> Result<Option<SchedulerMetadata>> {
        Ok(self.lock()?.metadata.clone())
    }

    async fn get_active_jobs(&self) -> Result<Vec<Job>> {
        let inner = self.lock()?;
        let mut jobs: Vec<Job> = inner.active.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        self.lock()?.active.insert(job.id, job.clone());
        Ok(())
    }

    async fn complete_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock()?;
        match job.status {
            JobStatus::Succeeded => {
                inner.completed.insert(job.id, job.clone());
            }
            JobStatus::Failed => {
                inner.failed.insert(job.id, job.clone());
            }
            status => {
                return Err(LakesyncError::Internal(format!(
                    "cannot archive job {} in status {status}",
                    job.id
                )))
            }
        }
        inner.active.remove(&job.id);
        Ok(())
    }

    async fn commit_job_data(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.committed_periods.contains(&job.data_period) {
            inner.committed_periods.push(job.data_period);
        }
        let metadata = inner.metadata.get_or_insert_with(SchedulerMetadata::default);
        metadata.last_scheduled_timestamp = Some(job.data_period.end);
        Ok(())
    }
}
