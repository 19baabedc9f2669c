use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default cap on concurrently running per-resource tasks.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default margin subtracted from the current time when closing a window,
/// absorbing upstream write-visibility lag.
pub const DEFAULT_QUERY_LATENCY_MINUTES: i64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Output namespace stamped onto every job.
    pub container_name: String,
    /// Lower bound of the first data window.
    pub start_time: DateTime<Utc>,
    /// Upper bound of the last data window; open-ended when absent.
    pub end_time: Option<DateTime<Utc>>,
    /// Restrict the fan-out to these resource types; empty means use the
    /// catalog.
    pub resource_type_filters: Vec<String>,
    /// Cap on in-flight per-resource tasks.
    pub max_concurrency: usize,
    /// Minutes subtracted from the current time when picking a window end.
    pub job_query_latency_minutes: i64,
}

impl SchedulerConfig {
    pub fn new(container_name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            container_name: container_name.into(),
            start_time,
            end_time: None,
            resource_type_filters: Vec::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            job_query_latency_minutes: DEFAULT_QUERY_LATENCY_MINUTES,
        }
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_resource_types(
        mut self,
        resource_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.resource_type_filters = resource_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_query_latency_minutes(mut self, minutes: i64) -> Self {
        self.job_query_latency_minutes = minutes;
        self
    }

    /// Latency margin as a duration.
    pub fn query_latency(&self) -> Duration {
        Duration::minutes(self.job_query_latency_minutes)
    }
}
