use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info};

use crate::config::PipelineConfig;
use crate::error::{Result, StoreError};
use crate::models::pipeline_name;
use crate::providers::BuildSource;
use crate::store::Store;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub pipelines: usize,
    pub failed_pipelines: usize,
    pub remote_builds: usize,
    pub queued: usize,
    pub already_queued: usize,
}

/// Diffs build numbers known to Jenkins against persisted builds and queues
/// the missing ones.
pub struct BuildReconciler {
    source: Arc<dyn BuildSource>,
    store: Arc<dyn Store>,
    existing_build_limit: usize,
}

impl BuildReconciler {
    pub fn new(source: Arc<dyn BuildSource>, store: Arc<dyn Store>, existing_build_limit: usize) -> Self {
        Self {
            source,
            store,
            existing_build_limit,
        }
    }

    /// Reconciles every pipeline in turn. A failing pipeline is logged and
    /// does not stop the others.
    pub async fn reconcile_all(&self, pipelines: &[PipelineConfig]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for pipeline in pipelines {
            summary.pipelines += 1;
            match self.reconcile_pipeline(&pipeline.url).await {
                Ok(pass) => {
                    summary.remote_builds += pass.remote_builds;
                    summary.queued += pass.queued;
                    summary.already_queued += pass.already_queued;
                }
                Err(e) => {
                    summary.failed_pipelines += 1;
                    error!("Failed to reconcile pipeline: job_path={} error={e}", pipeline.url);
                }
            }
        }

        info!(
            "Reconciliation complete: pipelines={} failed={} queued={} already_queued={}",
            summary.pipelines, summary.failed_pipelines, summary.queued, summary.already_queued
        );

        summary
    }

    /// Queues every remote build number of `job_path` that has no stored build.
    ///
    /// # Errors
    ///
    /// Returns an error if the build list cannot be fetched, the stored
    /// numbers cannot be read, or a queue insert fails for a reason other
    /// than the item already existing.
    pub async fn reconcile_pipeline(&self, job_path: &str) -> Result<ReconcileSummary> {
        let name = pipeline_name(job_path);

        let remote = self.source.list_build_numbers(job_path).await?;
        let persisted: HashSet<u32> = self
            .store
            .build_numbers(&name, self.existing_build_limit)
            .await?
            .into_iter()
            .collect();

        let mut summary = ReconcileSummary {
            pipelines: 1,
            remote_builds: remote.len(),
            ..ReconcileSummary::default()
        };

        let mut seen = HashSet::new();
        for number in remote {
            if persisted.contains(&number) || !seen.insert(number) {
                continue;
            }

            match self.store.enqueue(job_path, number).await {
                Ok(item) => {
                    debug!("Queued build: job_path={job_path} build={number} id={}", item.id);
                    summary.queued += 1;
                }
                Err(StoreError::DuplicateQueueItem { .. }) => {
                    debug!("Build already queued: job_path={job_path} build={number}");
                    summary.already_queued += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Reconciled pipeline: pipeline={name} remote={} persisted={} queued={}",
            summary.remote_builds,
            persisted.len(),
            summary.queued
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildRecord, BuildStatus, CollectionStatus};
    use crate::store::MemoryStore;
    use crate::sync::testing::FakeSource;
    use chrono::Utc;

    fn pipeline(url: &str) -> PipelineConfig {
        PipelineConfig {
            url: url.to_string(),
            anomaly_detection: None,
        }
    }

    fn stored(name: &str, number: u32) -> BuildRecord {
        let now = Utc::now();
        BuildRecord {
            pipeline_name: name.to_string(),
            build_number: number,
            start_time: now,
            end_time: now,
            status: BuildStatus::Success,
            waiting_time_seconds: None,
            buildable_time_seconds: None,
            blocked_time_seconds: None,
            building_time_seconds: None,
            triggered_by: None,
            error_log: None,
        }
    }

    #[tokio::test]
    async fn test_empty_store_queues_every_remote_build() {
        let source = Arc::new(FakeSource::default().with_builds("job/api", &[3, 2, 1]));
        let store = Arc::new(MemoryStore::new());
        let reconciler = BuildReconciler::new(source, store.clone(), 10_000);

        let summary = reconciler.reconcile_all(&[pipeline("job/api")]).await;
        assert_eq!(summary.queued, 3);

        let items = store.queue_items(&[]).await.unwrap();
        let mut numbers: Vec<u32> = items.iter().map(|item| item.build_number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(items
            .iter()
            .all(|item| item.collection_status == CollectionStatus::Pending && item.job_path == "job/api"));
    }

    #[tokio::test]
    async fn test_persisted_builds_are_not_queued() {
        let source = Arc::new(FakeSource::default().with_builds("job/api/", &[1, 2, 3]));
        let store = Arc::new(MemoryStore::new());
        store.insert_build(&stored("api", 2)).await.unwrap();

        let reconciler = BuildReconciler::new(source, store.clone(), 10_000);
        let summary = reconciler.reconcile_pipeline("job/api/").await.unwrap();
        assert_eq!(summary.remote_builds, 3);
        assert_eq!(summary.queued, 2);

        let numbers: Vec<u32> = store
            .queue_items(&[])
            .await
            .unwrap()
            .iter()
            .map(|item| item.build_number)
            .collect();
        assert!(!numbers.contains(&2));
    }

    #[tokio::test]
    async fn test_second_pass_counts_already_queued() {
        let source = Arc::new(FakeSource::default().with_builds("job/api", &[1, 2]));
        let store = Arc::new(MemoryStore::new());
        let reconciler = BuildReconciler::new(source, store.clone(), 10_000);

        reconciler.reconcile_pipeline("job/api").await.unwrap();
        let second = reconciler.reconcile_pipeline("job/api").await.unwrap();

        assert_eq!(second.queued, 0);
        assert_eq!(second.already_queued, 2);
        assert_eq!(store.queue_items(&[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_pipeline_does_not_stop_others() {
        let source = Arc::new(FakeSource::default().with_builds("job/docs", &[5]));
        let store = Arc::new(MemoryStore::new());
        let reconciler = BuildReconciler::new(source, store.clone(), 10_000);

        let summary = reconciler
            .reconcile_all(&[pipeline("job/missing"), pipeline("job/docs")])
            .await;

        assert_eq!(summary.pipelines, 2);
        assert_eq!(summary.failed_pipelines, 1);
        assert_eq!(summary.queued, 1);
    }
}
