use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::state::StoreState;
use super::{Store, StoreResult};
use crate::anomaly::MetricTimeSeries;
use crate::error::StoreError;
use crate::models::{AnomalyScore, BuildMetric, BuildRecord, CollectionStatus, QueueItem};

/// Volatile store, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn build_numbers(&self, pipeline_name: &str, limit: usize) -> StoreResult<Vec<u32>> {
        Ok(self.state()?.build_numbers(pipeline_name, limit))
    }

    async fn enqueue(&self, job_path: &str, build_number: u32) -> StoreResult<QueueItem> {
        self.state()?.enqueue(job_path, build_number)
    }

    async fn queue_items(&self, statuses: &[CollectionStatus]) -> StoreResult<Vec<QueueItem>> {
        Ok(self.state()?.queue_items(statuses))
    }

    async fn update_queue_item_status(
        &self,
        id: u64,
        status: CollectionStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        self.state()?
            .update_queue_item_status(id, status, error_message)
    }

    async fn requeue_errors(&self) -> StoreResult<usize> {
        Ok(self.state()?.requeue_errors())
    }

    async fn delete_queue_item(&self, id: u64) -> StoreResult<()> {
        self.state()?.delete_queue_item(id)
    }

    async fn insert_build(&self, build: &BuildRecord) -> StoreResult<()> {
        self.state()?.insert_build(build)
    }

    async fn get_build(&self, pipeline_name: &str, build_number: u32) -> StoreResult<Option<BuildRecord>> {
        Ok(self.state()?.get_build(pipeline_name, build_number))
    }

    async fn metric_time_series(
        &self,
        pipeline_name: &str,
        metric: BuildMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<MetricTimeSeries> {
        Ok(self
            .state()?
            .metric_time_series(pipeline_name, metric, start, end))
    }

    async fn insert_anomaly_score(&self, score: &AnomalyScore) -> StoreResult<()> {
        self.state()?.insert_anomaly_score(score);
        Ok(())
    }

    async fn anomaly_scores(&self, pipeline_name: Option<&str>) -> StoreResult<Vec<AnomalyScore>> {
        Ok(self.state()?.anomaly_scores(pipeline_name))
    }
}
