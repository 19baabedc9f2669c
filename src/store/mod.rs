//! Durable job state: the scheduler watermark, the at-most-one active job,
//! the completed/failed archive and the advisory lease.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryJobStore`]: shared in-process state, used by tests and
//!   single-node embeddings
//! - [`FileJobStore`]: directory of JSON records, one file per job plus the
//!   scheduler metadata and lease blobs

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::scheduler::job::{Job, SchedulerMetadata};

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

/// Storage contract consumed by the job manager.
///
/// All operations surface transient I/O problems as
/// [`StoreUnavailable`](crate::error::LakesyncError::StoreUnavailable).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Try to take the advisory lease. Returns false while another live
    /// holder owns it; never blocks. Acquiring again from the same holder
    /// renews the expiry.
    async fn acquire_lease(&self) -> Result<bool>;

    /// Give the lease back. Idempotent; a no-op when this handle does not
    /// hold it.
    async fn release_lease(&self) -> Result<()>;

    async fn get_scheduler_metadata(&self) -> Result<Option<SchedulerMetadata>>;

    /// Jobs not yet archived, ordered by creation time. At most one job is
    /// in flight at a time, so callers treat the first entry as "the"
    /// active job.
    async fn get_active_jobs(&self) -> Result<Vec<Job>>;

    /// Atomic full-snapshot write of the job record.
    async fn update_job(&self, job: &Job) -> Result<()>;

    /// Archive a terminal job into the completed or failed namespace and
    /// remove it from the active set. Idempotent.
    async fn complete_job(&self, job: &Job) -> Result<()>;

    /// Finalize the window's output and advance the scheduler watermark to
    /// `job.data_period.end` in one step. Idempotent: re-running after a
    /// crash either completes the commit or changes nothing.
    async fn commit_job_data(&self, job: &Job) -> Result<()>;
}
