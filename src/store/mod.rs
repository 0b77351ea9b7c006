mod file;
mod memory;
mod state;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::anomaly::MetricTimeSeries;
use crate::error::StoreError;
use crate::models::{AnomalyScore, BuildMetric, BuildRecord, CollectionStatus, QueueItem};

pub use file::FileStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence collaborator for queue items, builds and anomaly scores.
///
/// Every call is a discrete write; there are no transactions spanning calls.
/// Implementations must reject a second build with the same
/// `(pipeline_name, build_number)` and a second queue item with the same
/// `(job_path, build_number)`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persisted build numbers of a pipeline, newest first, at most `limit`.
    async fn build_numbers(&self, pipeline_name: &str, limit: usize) -> StoreResult<Vec<u32>>;

    /// Creates a `pending` queue item.
    async fn enqueue(&self, job_path: &str, build_number: u32) -> StoreResult<QueueItem>;

    /// Queue items in any of `statuses` (all items when empty), oldest first.
    async fn queue_items(&self, statuses: &[CollectionStatus]) -> StoreResult<Vec<QueueItem>>;

    /// Moves an item to `status` and stamps `last_attempt_at`.
    async fn update_queue_item_status(
        &self,
        id: u64,
        status: CollectionStatus,
        error_message: Option<String>,
    ) -> StoreResult<()>;

    /// Resets every `error` item to `pending`; returns how many were reset.
    async fn requeue_errors(&self) -> StoreResult<usize>;

    async fn delete_queue_item(&self, id: u64) -> StoreResult<()>;

    async fn insert_build(&self, build: &BuildRecord) -> StoreResult<()>;

    async fn get_build(&self, pipeline_name: &str, build_number: u32) -> StoreResult<Option<BuildRecord>>;

    /// Samples of `metric` for builds that started within `[start, end]`,
    /// ordered by start time. Builds without a value for the metric are left out.
    async fn metric_time_series(
        &self,
        pipeline_name: &str,
        metric: BuildMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<MetricTimeSeries>;

    async fn insert_anomaly_score(&self, score: &AnomalyScore) -> StoreResult<()>;

    /// Stored scores, optionally for one pipeline, in insertion order.
    async fn anomaly_scores(&self, pipeline_name: Option<&str>) -> StoreResult<Vec<AnomalyScore>>;
}
