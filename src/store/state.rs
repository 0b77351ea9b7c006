use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreResult;
use crate::anomaly::{MetricTimeSeries, TimeSeriesPoint};
use crate::error::StoreError;
use crate::models::{AnomalyScore, BuildMetric, BuildRecord, CollectionStatus, QueueItem};

/// Whole store contents. Shared by the in-memory and file backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct StoreState {
    #[serde(default)]
    next_queue_id: u64,
    #[serde(default)]
    queue: Vec<QueueItem>,
    #[serde(default)]
    builds: Vec<BuildRecord>,
    #[serde(default)]
    anomaly_scores: Vec<AnomalyScore>,
}

impl StoreState {
    pub(super) fn build_numbers(&self, pipeline_name: &str, limit: usize) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .builds
            .iter()
            .filter(|build| build.pipeline_name == pipeline_name)
            .map(|build| build.build_number)
            .collect();
        numbers.sort_unstable_by(|a, b| b.cmp(a));
        numbers.truncate(limit);
        numbers
    }

    pub(super) fn enqueue(&mut self, job_path: &str, build_number: u32) -> StoreResult<QueueItem> {
        let exists = self
            .queue
            .iter()
            .any(|item| item.job_path == job_path && item.build_number == build_number);
        if exists {
            return Err(StoreError::DuplicateQueueItem {
                job_path: job_path.to_string(),
                build_number,
            });
        }

        self.next_queue_id += 1;
        let item = QueueItem {
            id: self.next_queue_id,
            job_path: job_path.to_string(),
            build_number,
            collection_status: CollectionStatus::Pending,
            last_attempt_at: Utc::now(),
            error_message: None,
        };
        self.queue.push(item.clone());
        Ok(item)
    }

    pub(super) fn queue_items(&self, statuses: &[CollectionStatus]) -> Vec<QueueItem> {
        self.queue
            .iter()
            .filter(|item| statuses.is_empty() || statuses.contains(&item.collection_status))
            .cloned()
            .collect()
    }

    pub(super) fn update_queue_item_status(
        &mut self,
        id: u64,
        status: CollectionStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let item = self
            .queue
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(StoreError::QueueItemNotFound(id))?;

        item.collection_status = status;
        item.error_message = error_message;
        item.last_attempt_at = Utc::now();
        Ok(())
    }

    pub(super) fn requeue_errors(&mut self) -> usize {
        let mut reset = 0;
        for item in self
            .queue
            .iter_mut()
            .filter(|item| item.collection_status == CollectionStatus::Error)
        {
            item.collection_status = CollectionStatus::Pending;
            item.error_message = None;
            reset += 1;
        }
        reset
    }

    pub(super) fn delete_queue_item(&mut self, id: u64) -> StoreResult<()> {
        let before = self.queue.len();
        self.queue.retain(|item| item.id != id);
        if self.queue.len() == before {
            return Err(StoreError::QueueItemNotFound(id));
        }
        Ok(())
    }

    pub(super) fn insert_build(&mut self, build: &BuildRecord) -> StoreResult<()> {
        let exists = self.builds.iter().any(|existing| {
            existing.pipeline_name == build.pipeline_name
                && existing.build_number == build.build_number
        });
        if exists {
            return Err(StoreError::DuplicateBuild {
                pipeline_name: build.pipeline_name.clone(),
                build_number: build.build_number,
            });
        }

        self.builds.push(build.clone());
        Ok(())
    }

    pub(super) fn get_build(&self, pipeline_name: &str, build_number: u32) -> Option<BuildRecord> {
        self.builds
            .iter()
            .find(|build| build.pipeline_name == pipeline_name && build.build_number == build_number)
            .cloned()
    }

    pub(super) fn metric_time_series(
        &self,
        pipeline_name: &str,
        metric: BuildMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MetricTimeSeries {
        let mut builds: Vec<&BuildRecord> = self
            .builds
            .iter()
            .filter(|build| build.pipeline_name == pipeline_name)
            .filter(|build| build.start_time >= start && build.start_time <= end)
            .collect();
        builds.sort_by_key(|build| (build.start_time, build.build_number));

        let points = builds
            .into_iter()
            .filter_map(|build| {
                build.metric_value(metric).map(|value| TimeSeriesPoint {
                    timestamp: build.start_time,
                    value,
                    build_number: build.build_number,
                })
            })
            .collect();

        MetricTimeSeries {
            metric_name: metric.as_str().to_string(),
            points,
        }
    }

    pub(super) fn insert_anomaly_score(&mut self, score: &AnomalyScore) {
        self.anomaly_scores.push(score.clone());
    }

    pub(super) fn anomaly_scores(&self, pipeline_name: Option<&str>) -> Vec<AnomalyScore> {
        self.anomaly_scores
            .iter()
            .filter(|score| pipeline_name.map_or(true, |name| score.pipeline_name == name))
            .cloned()
            .collect()
    }
}
