//! Lease, archive and commit behavior of both store implementations.


use std::sync::Arc;

use chrono::Duration;

use lakesync::scheduler::job::{DataPeriod, Job, JobStatus};
use lakesync::store::{FileJobStore, JobStore, MemoryJobStore};

use test_harness::{utc, ManualClock};

fn sample_job(created_min: u32) -> Job {
    Job::new(
        "analytics".to_string(),
        vec!["Patient".to_string()],
        DataPeriod::new(utc(2024, 1, 1, 0, 0), utc(2024, 1, 1, 1, 0)),
        utc(2024, 1, 1, 1, created_min),
    )
}

#[tokio::test]
async fn test_memory_lease_blocks_other_holder() {
    let clock = ManualClock::new(utc(2024, 1, 1, 0, 0));
    let store = MemoryJobStore::with_clock(Arc::new(clock));
    let other = store.handle();

    assert!(store.acquire_lease().await.unwrap());
    assert!(!other.acquire_lease().await.unwrap());
    // Re-acquisition by the holder renews rather than conflicts.
    assert!(store.acquire_lease().await.unwrap());

    store.release_lease().await.unwrap();
    assert!(other.acquire_lease().await.unwrap());
}

#[tokio::test]
async fn test_memory_lease_expires_after_ttl() {
    let clock = ManualClock::new(utc(2024, 1, 1, 0, 0));
    let store =
        MemoryJobStore::with_clock(Arc::new(clock.clone())).with_lease_ttl(Duration::seconds(30));
    let other = store.handle();

    assert!(store.acquire_lease().await.unwrap());
    assert!(!other.acquire_lease().await.unwrap());

    // The holder crashes; its lease lapses after the TTL.
    clock.advance(Duration::seconds(31));
    assert!(other.acquire_lease().await.unwrap());
}

#[tokio::test]
async fn test_memory_release_is_scoped_to_holder() {
    let clock = ManualClock::new(utc(2024, 1, 1, 0, 0));
    let store = MemoryJobStore::with_clock(Arc::new(clock));
    let other = store.handle();

    assert!(store.acquire_lease().await.unwrap());
    // Releasing from a non-holder must not free the lease.
    other.release_lease().await.unwrap();
    assert!(!other.acquire_lease().await.unwrap());

    // Releasing twice is fine.
    store.release_lease().await.unwrap();
    store.release_lease().await.unwrap();
    assert!(other.acquire_lease().await.unwrap());
}

#[tokio::test]
async fn test_memory_archive_routes_by_status() {
    let store = MemoryJobStore::new();

    let mut succeeded = sample_job(0);
    succeeded.status = JobStatus::Succeeded;
    store.update_job(&succeeded).await.unwrap();
    store.complete_job(&succeeded).await.unwrap();

    let mut failed = sample_job(1);
    failed.status = JobStatus::Failed;
    failed.failed_reason = Some("upstream timeout".to_string());
    store.update_job(&failed).await.unwrap();
    store.complete_job(&failed).await.unwrap();

    assert!(store.get_active_jobs().await.unwrap().is_empty());
    assert_eq!(store.completed_jobs().unwrap().len(), 1);
    assert_eq!(store.failed_jobs().unwrap().len(), 1);

    // Archiving again is a no-op.
    store.complete_job(&succeeded).await.unwrap();
    assert_eq!(store.completed_jobs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_memory_archive_rejects_non_terminal_status() {
    let store = MemoryJobStore::new();
    let mut job = sample_job(0);
    job.status = JobStatus::Running;
    assert!(store.complete_job(&job).await.is_err());
}

#[tokio::test]
async fn test_memory_commit_is_idempotent() {
    let store = MemoryJobStore::new();
    let job = sample_job(0);

    store.commit_job_data(&job).await.unwrap();
    store.commit_job_data(&job).await.unwrap();

    assert_eq!(store.committed_periods().unwrap().len(), 1);
    let metadata = store.get_scheduler_metadata().await.unwrap().unwrap();
    assert_eq!(metadata.last_scheduled_timestamp, Some(job.data_period.end));
}

#[tokio::test]
async fn test_memory_active_jobs_ordered_by_creation() {
    let store = MemoryJobStore::new();
    let late = sample_job(30);
    let early = sample_job(10);
    store.update_job(&late).await.unwrap();
    store.update_job(&early).await.unwrap();

    let active = store.get_active_jobs().await.unwrap();
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].id, early.id);
    assert_eq!(active[1].id, late.id);
}

#[tokio::test]
async fn test_file_store_job_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileJobStore::open(dir.path()).await.unwrap();

    let mut job = sample_job(0);
    store.update_job(&job).await.unwrap();

    job.status = JobStatus::Running;
    job.processed_resource_counts
        .insert("Patient".to_string(), 42);
    store.update_job(&job).await.unwrap();

    let active = store.get_active_jobs().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0], job);
}

#[tokio::test]
async fn test_file_store_archive_moves_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileJobStore::open(dir.path()).await.unwrap();

    let mut job = sample_job(0);
    job.status = JobStatus::Succeeded;
    store.update_job(&job).await.unwrap();
    store.complete_job(&job).await.unwrap();

    assert!(store.get_active_jobs().await.unwrap().is_empty());
    let archived = dir.path().join("completed").join(format!("{}.json", job.id));
    assert!(archived.exists());

    // A fresh handle over the same directory sees the same state.
    let reopened = FileJobStore::open(dir.path()).await.unwrap();
    assert!(reopened.get_active_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_store_commit_and_metadata_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileJobStore::open(dir.path()).await.unwrap();

    assert!(store.get_scheduler_metadata().await.unwrap().is_none());

    let job = sample_job(0);
    store.commit_job_data(&job).await.unwrap();
    store.commit_job_data(&job).await.unwrap();

    let metadata = store.get_scheduler_metadata().await.unwrap().unwrap();
    assert_eq!(metadata.last_scheduled_timestamp, Some(job.data_period.end));
}

#[tokio::test]
async fn test_file_store_lease_ttl_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(utc(2024, 1, 1, 0, 0));

    let first = FileJobStore::open(dir.path())
        .await
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
        .with_lease_ttl(Duration::seconds(30));
    let second = FileJobStore::open(dir.path())
        .await
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
        .with_lease_ttl(Duration::seconds(30));

    assert!(first.acquire_lease().await.unwrap());
    assert!(!second.acquire_lease().await.unwrap());

    clock.advance(Duration::seconds(31));
    assert!(second.acquire_lease().await.unwrap());

    // The expired holder can neither reclaim silently nor release the
    // current holder's lease.
    assert!(!first.acquire_lease().await.unwrap());
    first.release_lease().await.unwrap();
    assert!(!first.acquire_lease().await.unwrap());
}

#[tokio::test]
async fn test_file_store_release_without_lease_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileJobStore::open(dir.path()).await.unwrap();
    store.release_lease().await.unwrap();
}
