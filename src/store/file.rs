//! Directory-backed job store with JSON records.
//!
//! Layout under the root:
//!
//! ```text
//! active/<job-id>.json      jobs not yet archived
//! completed/<job-id>.json   succeeded jobs
//! failed/<job-id>.json      failed jobs
//! scheduler/metadata.json   watermark record
//! scheduler/lease.json      advisory lease blob {holder_id, expires_at}
//! ```
//!
//! Record writes go to a temp file and are renamed into place, so readers
//! never observe a torn snapshot. The lease emulates a TTL: a blob whose
//! expiry has passed counts as released.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{LakesyncError, Result};
use crate::scheduler::job::{Job, JobStatus, SchedulerMetadata};

use super::JobStore;

const ACTIVE_DIR: &str = "active";
const COMPLETED_DIR: &str = "completed";
const FAILED_DIR: &str = "failed";
const SCHEDULER_DIR: &str = "scheduler";
const METADATA_FILE: &str = "metadata.json";
const LEASE_FILE: &str = "lease.json";

const DEFAULT_LEASE_TTL_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseBlob {
    holder_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// Job store rooted at a directory, one JSON record per job.
pub struct FileJobStore {
    root: PathBuf,
    holder_id: Uuid,
    lease_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl FileJobStore {
    /// Open a store rooted at `root`, creating the namespace directories.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [ACTIVE_DIR, COMPLETED_DIR, FAILED_DIR, SCHEDULER_DIR] {
            fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| store_err("create store directory", e))?;
        }
        Ok(Self {
            root,
            holder_id: Uuid::new_v4(),
            lease_ttl: Duration::seconds(DEFAULT_LEASE_TTL_SECS),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn job_path(&self, namespace: &str, id: Uuid) -> PathBuf {
        self.root.join(namespace).join(format!("{id}.json"))
    }

    fn lease_path(&self) -> PathBuf {
        self.root.join(SCHEDULER_DIR).join(LEASE_FILE)
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join(SCHEDULER_DIR).join(METADATA_FILE)
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|e| store_err("encode record", e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| store_err("write record", e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| store_err("rename record into place", e))?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| store_err("decode record", e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err("read record", e)),
        }
    }

    async fn remove_if_present(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err("remove record", e)),
        }
    }
}

fn store_err(context: &str, err: impl std::fmt::Display) -> LakesyncError {
    LakesyncError::StoreUnavailable(format!("{context}: {err}"))
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn acquire_lease(&self) -> Result<bool> {
        let now = self.clock.now();
        if let Some(lease) = self.read_json::<LeaseBlob>(&self.lease_path()).await? {
            if lease.holder_id != self.holder_id && lease.expires_at > now {
                return Ok(false);
            }
        }
        let blob = LeaseBlob {
            holder_id: self.holder_id,
            expires_at: now + self.lease_ttl,
        };
        self.write_json(&self.lease_path(), &blob).await?;
        Ok(true)
    }

    async fn release_lease(&self) -> Result<()> {
        if let Some(lease) = self.read_json::<LeaseBlob>(&self.lease_path()).await? {
            if lease.holder_id == self.holder_id {
                self.remove_if_present(&self.lease_path()).await?;
            }
        }
        Ok(())
    }

    async fn get_scheduler_metadata(&self) -> Result<Option<SchedulerMetadata>> {
        self.read_json(&self.metadata_path()).await
    }

    async fn get_active_jobs(&self) -> Result<Vec<Job>> {
        let dir = self.root.join(ACTIVE_DIR);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| store_err("list active jobs", e))?;
        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_err("list active jobs", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(job) = self.read_json::<Job>(&path).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        self.write_json(&self.job_path(ACTIVE_DIR, job.id), job).await
    }

    async fn complete_job(&self, job: &Job) -> Result<()> {
        let namespace = match job.status {
            JobStatus::Succeeded => COMPLETED_DIR,
            JobStatus::Failed => FAILED_DIR,
            status => {
                return Err(LakesyncError::Internal(format!(
                    "cannot archive job {} in status {status}",
                    job.id
                )))
            }
        };
        self.write_json(&self.job_path(namespace, job.id), job).await?;
        self.remove_if_present(&self.job_path(ACTIVE_DIR, job.id)).await
    }

    async fn commit_job_data(&self, job: &Job) -> Result<()> {
        // Output parts were written by the executors; committing here means
        // advancing the watermark past the window.
        let metadata = SchedulerMetadata {
            last_scheduled_timestamp: Some(job.data_period.end),
        };
        self.write_json(&self.metadata_path(), &metadata).await
    }
}
