pub mod job;
pub mod manager;

pub use job::{DataPeriod, Job, JobStatus, ResourceProgress, SchedulerMetadata};
pub use manager::JobManager;
