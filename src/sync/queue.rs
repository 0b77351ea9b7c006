use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{Result, SentinelError, StoreError};
use crate::models::{pipeline_name, BuildRecord, BuildStatus, CollectionStatus, QueueItem};
use crate::providers::jenkins::{extract_timing_metrics, extract_triggered_by};
use crate::providers::{BuildDetail, BuildSource};
use crate::store::Store;

/// Counts from one queue processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub selected: usize,
    pub stored: usize,
    pub already_stored: usize,
    pub still_running: usize,
    pub errored: usize,
    pub deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Stored,
    AlreadyStored,
    StillRunning,
    Errored,
    /// The build could not be persisted; the item stays as it was.
    Deferred,
}

/// Turns queued build numbers into stored builds, one item at a time.
pub struct QueueProcessor {
    source: Arc<dyn BuildSource>,
    store: Arc<dyn Store>,
    config: QueueConfig,
}

impl QueueProcessor {
    pub fn new(source: Arc<dyn BuildSource>, store: Arc<dyn Store>, config: QueueConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    fn selected_statuses(&self) -> Vec<CollectionStatus> {
        if self.config.retry_errored {
            vec![CollectionStatus::Pending, CollectionStatus::Error]
        } else {
            vec![CollectionStatus::Pending]
        }
    }

    /// Processes every selectable queue item.
    ///
    /// # Errors
    ///
    /// Only fails if the queue itself cannot be read. Per-item failures are
    /// recorded on the item and counted in the summary.
    pub async fn process(&self) -> Result<QueueSummary> {
        let items = self.store.queue_items(&self.selected_statuses()).await?;
        let mut summary = QueueSummary {
            selected: items.len(),
            ..QueueSummary::default()
        };

        info!("Processing build queue: items={}", items.len());

        for item in &items {
            match self.process_item(item).await {
                ItemOutcome::Stored => summary.stored += 1,
                ItemOutcome::AlreadyStored => summary.already_stored += 1,
                ItemOutcome::StillRunning => summary.still_running += 1,
                ItemOutcome::Errored => summary.errored += 1,
                ItemOutcome::Deferred => summary.deferred += 1,
            }
        }

        info!(
            "Queue processing complete: stored={} running={} errored={} deferred={}",
            summary.stored, summary.still_running, summary.errored, summary.deferred
        );

        Ok(summary)
    }

    async fn process_item(&self, item: &QueueItem) -> ItemOutcome {
        let job_path = item.job_path.as_str();
        let number = item.build_number;

        let detail = match self.source.get_build_detail(job_path, number).await {
            Ok(detail) => detail,
            Err(e) => return self.mark_error(item, &e).await,
        };

        if detail.is_building() {
            debug!("Build still running: job_path={job_path} build={number}");
            return ItemOutcome::StillRunning;
        }

        let mut record = match build_record(item, &detail) {
            Ok(record) => record,
            Err(e) => return self.mark_error(item, &e).await,
        };

        if self.config.capture_failure_logs && record.status.is_failing() {
            record.error_log = self.failure_log(job_path, number).await;
        }

        match self.store.insert_build(&record).await {
            Ok(()) => {
                debug!(
                    "Stored build: pipeline={} build={number} status={}",
                    record.pipeline_name, record.status
                );
                self.remove(item).await;
                ItemOutcome::Stored
            }
            Err(StoreError::DuplicateBuild { .. }) => {
                info!(
                    "Build already stored, dropping queue item: pipeline={} build={number}",
                    record.pipeline_name
                );
                self.remove(item).await;
                ItemOutcome::AlreadyStored
            }
            Err(e) => {
                error!("Failed to store build: job_path={job_path} build={number} error={e}");
                ItemOutcome::Deferred
            }
        }
    }

    async fn mark_error(&self, item: &QueueItem, cause: &SentinelError) -> ItemOutcome {
        error!(
            "Failed to collect build: job_path={} build={} error={cause}",
            item.job_path, item.build_number
        );

        if let Err(e) = self
            .store
            .update_queue_item_status(item.id, CollectionStatus::Error, Some(cause.to_string()))
            .await
        {
            error!("Failed to mark queue item {} as errored: {e}", item.id);
        }

        ItemOutcome::Errored
    }

    /// A leftover item is reprocessed next pass and dropped as already stored.
    async fn remove(&self, item: &QueueItem) {
        if let Err(e) = self.store.delete_queue_item(item.id).await {
            warn!("Failed to delete queue item {}: {e}", item.id);
        }
    }

    async fn failure_log(&self, job_path: &str, number: u32) -> Option<String> {
        match self.source.get_console_log(job_path, number).await {
            Ok(log) => Some(tail_lines(&log, self.config.failure_log_lines)),
            Err(e) => {
                warn!("Failed to fetch console log: job_path={job_path} build={number} error={e}");
                None
            }
        }
    }
}

fn build_record(item: &QueueItem, detail: &BuildDetail) -> Result<BuildRecord> {
    let (Some(start_time), Some(end_time)) = (detail.start_time(), detail.end_time()) else {
        return Err(SentinelError::MalformedBuild {
            job_path: item.job_path.clone(),
            build_number: item.build_number,
            reason: "missing or invalid timestamp".to_string(),
        });
    };

    let timing = extract_timing_metrics(detail);

    Ok(BuildRecord {
        pipeline_name: pipeline_name(&item.job_path),
        build_number: item.build_number,
        start_time,
        end_time,
        status: BuildStatus::from_jenkins_result(detail.result.as_deref()),
        waiting_time_seconds: timing.waiting_time_seconds,
        buildable_time_seconds: timing.buildable_time_seconds,
        blocked_time_seconds: timing.blocked_time_seconds,
        building_time_seconds: timing.building_time_seconds,
        triggered_by: extract_triggered_by(detail),
        error_log: None,
    })
}

fn tail_lines(log: &str, count: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}
