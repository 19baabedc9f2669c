//! Lease exclusion, concurrency-cap and cancellation behavior.


use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use lakesync::config::SchedulerConfig;
use lakesync::error::LakesyncError;
use lakesync::scheduler::job::JobStatus;
use lakesync::store::{JobStore, MemoryJobStore};

use test_harness::{
    assert_eventually, manager, utc, BlockingExecutor, ManualClock, PagingExecutor,
};

#[tokio::test]
async fn test_trigger_is_mutually_exclusive_across_sessions() {
    let store = MemoryJobStore::new();
    let clock = ManualClock::new(utc(2024, 1, 1, 2, 0));
    let blocking = Arc::new(BlockingExecutor::new());
    let stats = blocking.stats.clone();
    let config = SchedulerConfig::new("analytics", utc(2024, 1, 1, 0, 0))
        .with_resource_types(["Patient"]);

    let first = manager(
        Arc::new(store.clone()),
        blocking.clone(),
        clock.clone(),
        &[],
        config.clone(),
    );
    let first_run = tokio::spawn(async move { first.trigger(CancellationToken::new()).await });
    assert_eventually(
        || stats.started_count() == 1,
        Duration::from_secs(2),
        "first trigger reaches the fan-out",
    )
    .await;

    // A second session over the same backing state bounces off the lease
    // without touching the job.
    let second_executor = Arc::new(PagingExecutor::new(1));
    let second = manager(
        Arc::new(store.handle()),
        second_executor.clone(),
        clock,
        &[],
        config,
    );
    second.trigger(CancellationToken::new()).await.unwrap();
    assert_eq!(second_executor.stats.started_count(), 0);
    assert_eq!(stats.started_count(), 1);
    assert_eq!(store.get_active_jobs().await.unwrap().len(), 1);

    blocking.release(1);
    first_run.await.unwrap().unwrap();
    assert_eq!(store.completed_jobs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let store = MemoryJobStore::new();
    let clock = ManualClock::new(utc(2024, 1, 1, 2, 0));
    let executor = Arc::new(PagingExecutor::new(2).with_page_delay(Duration::from_millis(10)));
    let stats = executor.stats.clone();
    let config = SchedulerConfig::new("analytics", utc(2024, 1, 1, 0, 0))
        .with_resource_types([
            "Patient",
            "Observation",
            "Encounter",
            "Claim",
            "Practitioner",
            "Device",
        ])
        .with_max_concurrency(2);
    let manager = manager(Arc::new(store.clone()), executor, clock, &[], config);

    manager.trigger(CancellationToken::new()).await.unwrap();

    assert_eq!(stats.started_count(), 6);
    assert!(
        stats.max_inflight_count() <= 2,
        "saw {} overlapping tasks",
        stats.max_inflight_count()
    );
    assert_eq!(store.completed_jobs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_new_tasks_submitted_after_failure() {
    let store = MemoryJobStore::new();
    let clock = ManualClock::new(utc(2024, 1, 1, 2, 0));
    let executor = Arc::new(PagingExecutor::new(1).with_failure_at("Patient", 1));
    let stats = executor.stats.clone();
    let config = SchedulerConfig::new("analytics", utc(2024, 1, 1, 0, 0))
        .with_resource_types([
            "Patient",
            "Observation",
            "Encounter",
            "Claim",
            "Practitioner",
            "Device",
        ])
        .with_max_concurrency(1);
    let manager = manager(Arc::new(store.clone()), executor, clock, &[], config);

    let err = manager.trigger(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, LakesyncError::ExecuteTaskFailed(_)));
    assert_eq!(stats.started_count(), 1);
}

#[tokio::test]
async fn test_cancellation_is_observed_promptly() {
    let store = MemoryJobStore::new();
    let clock = ManualClock::new(utc(2024, 1, 1, 2, 0));
    let executor =
        Arc::new(PagingExecutor::new(1_000_000).with_page_delay(Duration::from_millis(2)));
    let stats = executor.stats.clone();
    let config = SchedulerConfig::new("analytics", utc(2024, 1, 1, 0, 0))
        .with_resource_types(["Patient", "Observation"])
        .with_max_concurrency(2);
    let manager = manager(Arc::new(store.clone()), executor, clock, &[], config);

    let outer = CancellationToken::new();
    let trigger_token = outer.clone();
    let run = tokio::spawn(async move { manager.trigger(trigger_token).await });
    assert_eventually(
        || stats.started_count() == 2,
        Duration::from_secs(2),
        "both tasks running",
    )
    .await;

    let cancelled_at = Instant::now();
    outer.cancel();
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, LakesyncError::Cancelled));
    assert!(
        cancelled_at.elapsed() < Duration::from_secs(2),
        "cancellation took {:?}",
        cancelled_at.elapsed()
    );

    // The job stays durably Running for the next trigger to resume.
    let active = store.get_active_jobs().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, JobStatus::Running);
}
