use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::executor::{TaskContext, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    New,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::New => write!(f, "new"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Half-open interval `[start, end)` of source-record timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DataPeriod {
    /// Invariant: `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "data period must be non-empty");
        Self { start, end }
    }
}

/// Pagination state for one resource type within a job.
///
/// Absence from [`Job::resource_progresses`] means the resource type has not
/// been started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "token", rename_all = "snake_case")]
pub enum ResourceProgress {
    /// Mid-pagination; the token is opaque and persisted verbatim.
    InFlight(String),
    /// Upstream pagination exhausted.
    Drained,
}

/// Durable scheduler state outside any job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetadata {
    /// End of the most recently committed window, if any.
    pub last_scheduled_timestamp: Option<DateTime<Utc>>,
}

/// One in-flight extraction window.
///
/// Mutated only by the job manager under its job lock and persisted as a
/// full snapshot after every mutation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Target output namespace.
    pub container_name: String,
    pub status: JobStatus,
    /// Resource types this job extracts, fixed at creation.
    pub resource_types: Vec<String>,
    pub data_period: DataPeriod,
    pub created_at: DateTime<Utc>,
    /// Resource types fully drained for this window.
    pub completed_resources: BTreeSet<String>,
    /// Pagination state per resource type; absent means not started.
    pub resource_progresses: BTreeMap<String, ResourceProgress>,
    /// Upstream-reported totals per resource type (best effort).
    pub total_resource_counts: BTreeMap<String, u64>,
    pub processed_resource_counts: BTreeMap<String, u64>,
    pub skipped_resource_counts: BTreeMap<String, u64>,
    /// Monotonic output-part sequence per resource type.
    pub part_ids: BTreeMap<String, u64>,
    /// Diagnostic populated only when `status` is `Failed`.
    pub failed_reason: Option<String>,
}

impl Job {
    pub fn new(
        container_name: String,
        resource_types: Vec<String>,
        data_period: DataPeriod,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            container_name,
            status: JobStatus::New,
            resource_types,
            data_period,
            created_at,
            completed_resources: BTreeSet::new(),
            resource_progresses: BTreeMap::new(),
            total_resource_counts: BTreeMap::new(),
            processed_resource_counts: BTreeMap::new(),
            skipped_resource_counts: BTreeMap::new(),
            part_ids: BTreeMap::new(),
            failed_reason: None,
        }
    }

    /// True when nothing remains to do for the resource type.
    pub fn is_resource_completed(&self, resource_type: &str) -> bool {
        self.completed_resources.contains(resource_type)
            || matches!(
                self.resource_progresses.get(resource_type),
                Some(ResourceProgress::Drained)
            )
    }

    /// Build the work descriptor a task resumes from.
    pub fn task_context(&self, resource_type: &str) -> TaskContext {
        let continuation_token = match self.resource_progresses.get(resource_type) {
            Some(ResourceProgress::InFlight(token)) => Some(token.clone()),
            _ => None,
        };
        TaskContext {
            resource_type: resource_type.to_string(),
            continuation_token,
            search_count: self.count(&self.total_resource_counts, resource_type),
            processed_count: self.count(&self.processed_resource_counts, resource_type),
            skipped_count: self.count(&self.skipped_resource_counts, resource_type),
            part_id: self.count(&self.part_ids, resource_type),
            is_completed: self.is_resource_completed(resource_type),
        }
    }

    /// Fold a pagination checkpoint into the job.
    ///
    /// Returns false when the resource type has already completed; the
    /// caller must drop the report without persisting it.
    pub fn apply_progress(&mut self, context: &TaskContext) -> bool {
        if self.completed_resources.contains(&context.resource_type) {
            return false;
        }
        if context.is_completed {
            self.resource_progresses
                .insert(context.resource_type.clone(), ResourceProgress::Drained);
        } else if let Some(token) = &context.continuation_token {
            self.resource_progresses.insert(
                context.resource_type.clone(),
                ResourceProgress::InFlight(token.clone()),
            );
        }
        self.set_counts(
            &context.resource_type,
            context.search_count,
            context.processed_count,
            context.skipped_count,
            context.part_id,
        );
        true
    }

    /// Fold a task's terminal report into the job.
    ///
    /// The terminal result is authoritative over any racing progress
    /// callback for the same resource type.
    pub fn apply_result(&mut self, result: &TaskResult) {
        if self.completed_resources.contains(&result.resource_type) {
            return;
        }
        if result.is_completed {
            self.completed_resources.insert(result.resource_type.clone());
            self.resource_progresses
                .insert(result.resource_type.clone(), ResourceProgress::Drained);
        } else if let Some(token) = &result.continuation_token {
            self.resource_progresses.insert(
                result.resource_type.clone(),
                ResourceProgress::InFlight(token.clone()),
            );
        }
        self.set_counts(
            &result.resource_type,
            result.search_count,
            result.processed_count,
            result.skipped_count,
            result.part_id,
        );
    }

    fn count(&self, counts: &BTreeMap<String, u64>, resource_type: &str) -> u64 {
        counts.get(resource_type).copied().unwrap_or(0)
    }

    fn set_counts(
        &mut self,
        resource_type: &str,
        search: u64,
        processed: u64,
        skipped: u64,
        part_id: u64,
    ) {
        self.total_resource_counts
            .insert(resource_type.to_string(), search);
        self.processed_resource_counts
            .insert(resource_type.to_string(), processed);
        self.skipped_resource_counts
            .insert(resource_type.to_string(), skipped);
        self.part_ids.insert(resource_type.to_string(), part_id);
    }
}
