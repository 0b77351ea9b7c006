use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};

use super::state::StoreState;
use super::{Store, StoreResult};
use crate::anomaly::MetricTimeSeries;
use crate::error::StoreError;
use crate::models::{AnomalyScore, BuildMetric, BuildRecord, CollectionStatus, QueueItem};

/// Store backed by a single JSON file.
///
/// The whole state is kept in memory and rewritten after every mutation.
/// A mutation only becomes visible once the file write succeeded, so a
/// failed write leaves both the file and the in-memory view unchanged.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupt` if the file exists but is not valid
    /// store JSON, or `StoreError::Persist` if it cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let state = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StoreError::Persist {
                path: path.clone(),
                source,
            })?;
            let state: StoreState =
                serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                    path: path.clone(),
                    source,
                })?;
            debug!("Loaded store from: {}", path.display());
            state
        } else {
            StoreState::default()
        };

        info!("Using store file: {}", path.display());

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Applies `change` to a copy of the state, writes it, then commits it.
    fn mutate<T>(&self, change: impl FnOnce(&mut StoreState) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.state()?;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.write(&next)?;
        *guard = next;
        Ok(out)
    }

    fn write(&self, state: &StoreState) -> StoreResult<()> {
        let persist_err = |source| StoreError::Persist {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(persist_err)?;
        }

        let content = serde_json::to_string(state).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // Write beside the target and rename so readers never see a torn file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(persist_err)?;
        fs::rename(&tmp, &self.path).map_err(persist_err)?;

        debug!("Saved store to: {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn build_numbers(&self, pipeline_name: &str, limit: usize) -> StoreResult<Vec<u32>> {
        Ok(self.state()?.build_numbers(pipeline_name, limit))
    }

    async fn enqueue(&self, job_path: &str, build_number: u32) -> StoreResult<QueueItem> {
        self.mutate(|state| state.enqueue(job_path, build_number))
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
        self.mutate(|state| state.update_queue_item_status(id, status, error_message))
    }

    async fn requeue_errors(&self) -> StoreResult<usize> {
        self.mutate(|state| Ok(state.requeue_errors()))
    }

    async fn delete_queue_item(&self, id: u64) -> StoreResult<()> {
        self.mutate(|state| state.delete_queue_item(id))
    }

    async fn insert_build(&self, build: &BuildRecord) -> StoreResult<()> {
        self.mutate(|state| state.insert_build(build))
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
        self.mutate(|state| {
            state.insert_anomaly_score(score);
            Ok(())
        })
    }

    async fn anomaly_scores(&self, pipeline_name: Option<&str>) -> StoreResult<Vec<AnomalyScore>> {
        Ok(self.state()?.anomaly_scores(pipeline_name))
    }
}
