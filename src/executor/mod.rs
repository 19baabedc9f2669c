//! Task execution contracts for per-resource extraction work.
//!
//! One task drives one resource type through upstream pagination for a
//! job's data window:
//!
//! 1. Resume from [`TaskContext::continuation_token`] (or the beginning)
//! 2. Transform and write each page, then report it through the
//!    [`ProgressSink`]
//! 3. Return a [`TaskResult`] whose `is_completed` is true iff pagination
//!    is exhausted
//!
//! Continuation tokens are opaque strings owned by the upstream server;
//! they are persisted verbatim and never parsed here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// In-memory work descriptor for one resource type within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub resource_type: String,
    /// Token to resume pagination from; `None` starts at the beginning.
    pub continuation_token: Option<String>,
    /// Upstream-reported total for the window (best effort).
    pub search_count: u64,
    /// Records successfully written.
    pub processed_count: u64,
    /// Records rejected by the transform.
    pub skipped_count: u64,
    /// Sequence number of the next output part for this resource type.
    pub part_id: u64,
    /// True when nothing remains to do for this resource type.
    pub is_completed: bool,
}

impl TaskContext {
    /// Terminal report carrying this context's state.
    pub fn into_result(self, is_completed: bool) -> TaskResult {
        TaskResult {
            resource_type: self.resource_type,
            continuation_token: self.continuation_token,
            search_count: self.search_count,
            processed_count: self.processed_count,
            skipped_count: self.skipped_count,
            part_id: self.part_id,
            is_completed,
        }
    }
}

/// Terminal report from one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub resource_type: String,
    pub continuation_token: Option<String>,
    pub search_count: u64,
    pub processed_count: u64,
    pub skipped_count: u64,
    pub part_id: u64,
    /// True iff upstream pagination for the window is exhausted.
    pub is_completed: bool,
}

/// Receives pagination checkpoints from running tasks.
///
/// A report for a resource type that already completed is dropped; a late
/// callback from a cancelled task never resurrects drained state.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, context: TaskContext) -> Result<()>;
}

/// Drives one resource type to completion for a job's data window.
///
/// Implementations must observe `cancel` and return promptly once it fires;
/// an abnormally cancelled task is a failure from the fan-out's point of
/// view.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        context: TaskContext,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<TaskResult>;
}
