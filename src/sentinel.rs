use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::anomaly::{run_detections, DetectorRegistry, Runner};
use crate::config::{AnomalyProcessingConfig, Config};
use crate::error::{Result, SentinelError};
use crate::providers::{BuildSource, JenkinsClient};
use crate::store::{FileStore, Store};
use crate::sync::{
    persist_scores, AnomalyPipelineBuilder, BuildReconciler, QueueProcessor, QueueSummary,
    ReconcileSummary, ScoreSummary,
};

/// Results of one full reconcile, collect and detect cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub reconcile: ReconcileSummary,
    pub queue: QueueSummary,
    pub detection: ScoreSummary,
}

/// Everything an operation needs, built once at startup and passed around.
pub struct Sentinel {
    config: Config,
    source: Arc<dyn BuildSource>,
    store: Arc<dyn Store>,
    registry: Option<Arc<DetectorRegistry>>,
}

/// Scans the configured detector directory.
///
/// # Errors
///
/// Fails if the runner is empty or the directory cannot be read.
pub fn discover_detectors(config: &AnomalyProcessingConfig) -> Result<DetectorRegistry> {
    let runner = Runner::from_command(&config.runner).ok_or_else(|| {
        SentinelError::Config("anomaly_processing.runner must name a program".into())
    })?;
    DetectorRegistry::discover(&config.detector_directory, &runner, &config.script_extensions)
}

impl Sentinel {
    pub fn new(config: Config, source: Arc<dyn BuildSource>, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            source,
            store,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<DetectorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validates `config` and wires up the Jenkins client, the file store
    /// and, when any pipeline asks for detection, the detector registry.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, an unreadable store file,
    /// or a detector directory that cannot be scanned.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let client = JenkinsClient::from_config(&config.jenkins)?;
        info!(
            "Jenkins client ready: base_url={} max_attempts={}",
            config.jenkins.base_url,
            client.retry_policy().max_attempts
        );

        let store = FileStore::open(config.store_path()?)?;

        let wants_detection = config
            .pipelines
            .iter()
            .any(|pipeline| pipeline.anomaly_detection.is_some());
        let registry = if wants_detection {
            Some(Arc::new(discover_detectors(&config.anomaly_processing)?))
        } else {
            None
        };

        Ok(Self {
            config,
            source: Arc::new(client),
            store: Arc::new(store),
            registry,
        })
    }

    pub async fn reconcile(&self) -> ReconcileSummary {
        BuildReconciler::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.config.queue.existing_build_limit,
        )
        .reconcile_all(&self.config.pipelines)
        .await
    }

    /// # Errors
    ///
    /// Fails only if the queue cannot be read.
    pub async fn process_queue(&self) -> Result<QueueSummary> {
        QueueProcessor::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.config.queue.clone(),
        )
        .process()
        .await
    }

    /// Builds detection jobs from stored builds, runs them and stores the scores.
    ///
    /// Cancelling `cancel` (or hitting `anomaly_processing.timeout_seconds`)
    /// kills running detectors; scores from jobs that already finished are
    /// still stored.
    ///
    /// # Errors
    ///
    /// Fails if jobs exist but no detector registry was set up.
    pub async fn detect(&self, cancel: &CancellationToken) -> Result<ScoreSummary> {
        let jobs = AnomalyPipelineBuilder::new(Arc::clone(&self.store))
            .build_jobs(&self.config.pipelines, Utc::now())
            .await;
        if jobs.is_empty() {
            return Ok(ScoreSummary::default());
        }

        let registry = self.registry.as_ref().ok_or_else(|| {
            SentinelError::Config("anomaly detection configured but no detectors loaded".into())
        })?;

        let run = cancel.child_token();
        let deadline = self
            .config
            .anomaly_processing
            .timeout_seconds
            .map(Duration::from_secs)
            .map(|timeout| {
                let run = run.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    warn!("Anomaly detection timed out after {timeout:?}, cancelling detectors");
                    run.cancel();
                })
            });

        let results = run_detections(
            &run,
            registry,
            jobs.clone(),
            self.config.anomaly_processing.max_parallel,
        )
        .await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        Ok(persist_scores(self.store.as_ref(), &jobs, &results).await)
    }

    /// Reconciles, processes the queue, then runs detection.
    ///
    /// # Errors
    ///
    /// Propagates queue read failures and a missing detector registry.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let reconcile = self.reconcile().await;
        let queue = self.process_queue().await?;
        let detection = self.detect(cancel).await?;

        Ok(CycleReport {
            reconcile,
            queue,
            detection,
        })
    }
}
