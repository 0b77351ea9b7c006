use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};

use crate::anomaly::{AnomalyDetectionJob, AnomalyResult, DetectionInput, DetectionResult};
use crate::config::{AnomalyDetectionConfig, PipelineConfig};
use crate::models::{pipeline_name, AnomalyScore, BuildMetric};
use crate::store::Store;

/// Builds one detection job per configured pipeline from stored builds.
pub struct AnomalyPipelineBuilder {
    store: Arc<dyn Store>,
}

impl AnomalyPipelineBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Jobs for every pipeline that names a detector and has data in its window.
    ///
    /// Metrics whose series cannot be read are logged and skipped; a pipeline
    /// with no remaining points gets no job.
    pub async fn build_jobs(
        &self,
        pipelines: &[PipelineConfig],
        now: DateTime<Utc>,
    ) -> Vec<AnomalyDetectionJob> {
        let mut jobs = Vec::new();

        for pipeline in pipelines {
            let Some(detection) = pipeline.anomaly_detection.as_ref() else {
                continue;
            };
            if detection.name.is_empty() || detection.metrics.is_empty() {
                debug!(
                    "Skipping anomaly detection for {}: detector or metrics not configured",
                    pipeline.url
                );
                continue;
            }

            match self.build_job(&pipeline.url, detection, now).await {
                Some(job) => jobs.push(job),
                None => info!(
                    "No time series data for pipeline {}, skipping anomaly detection",
                    pipeline_name(&pipeline.url)
                ),
            }
        }

        info!("Built {} anomaly detection jobs", jobs.len());
        jobs
    }

    async fn build_job(
        &self,
        job_path: &str,
        detection: &AnomalyDetectionConfig,
        now: DateTime<Utc>,
    ) -> Option<AnomalyDetectionJob> {
        let name = pipeline_name(job_path);
        let start = now - Duration::hours(i64::from(detection.time_window_hours));

        let mut time_series = Vec::new();
        for metric_name in &detection.metrics {
            let metric: BuildMetric = match metric_name.parse() {
                Ok(metric) => metric,
                Err(e) => {
                    warn!("Skipping metric for pipeline {name}: {e}");
                    continue;
                }
            };

            let series = match self.store.metric_time_series(&name, metric, start, now).await {
                Ok(series) => series,
                Err(e) => {
                    error!("Failed to read metric {metric} for pipeline {name}: {e}");
                    continue;
                }
            };
            if series.points.is_empty() {
                debug!("No points for metric {metric} in pipeline {name}");
                continue;
            }
            time_series.push(series);
        }

        if time_series.is_empty() {
            return None;
        }

        Some(AnomalyDetectionJob {
            pipeline_name: name.clone(),
            detector_name: detection.name.clone(),
            input: DetectionInput {
                pipeline_name: name,
                time_window_hours: detection.time_window_hours,
                metrics: detection.metrics.clone(),
                time_series,
            },
            params: detection.detector_params(),
        })
    }
}

/// Counts from persisting one detection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreSummary {
    pub jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_run: usize,
    pub scores_stored: usize,
    pub anomalies_flagged: usize,
}

/// Stores every anomaly result of `results`, where `results[i]` answers `jobs[i]`.
///
/// Scores take the detector name from the job. A result without a build
/// number is matched back to its input point by metric and timestamp.
pub async fn persist_scores(
    store: &dyn Store,
    jobs: &[AnomalyDetectionJob],
    results: &[Option<DetectionResult>],
) -> ScoreSummary {
    let mut summary = ScoreSummary {
        jobs: jobs.len(),
        ..ScoreSummary::default()
    };

    for (job, slot) in jobs.iter().zip(results) {
        let Some(result) = slot else {
            summary.not_run += 1;
            debug!(
                "Detection not run: pipeline={} detector={}",
                job.pipeline_name, job.detector_name
            );
            continue;
        };

        let output = match &result.outcome {
            Ok(output) => output,
            Err(_) => {
                summary.failed += 1;
                continue;
            }
        };
        summary.succeeded += 1;

        let mut flagged = 0;
        for anomaly in &output.anomalies {
            let score = anomaly_score(job, anomaly);
            match store.insert_anomaly_score(&score).await {
                Ok(()) => {
                    summary.scores_stored += 1;
                    if score.is_anomaly {
                        flagged += 1;
                    }
                }
                Err(e) => error!(
                    "Failed to store anomaly score: pipeline={} metric={} error={e}",
                    job.pipeline_name, anomaly.metric_name
                ),
            }
        }
        summary.anomalies_flagged += flagged;

        info!(
            "Anomaly detection complete: pipeline={} detector={} scores={} anomalies={flagged} processed_points={}",
            job.pipeline_name,
            job.detector_name,
            output.anomalies.len(),
            output.metadata.processed_points
        );
    }

    summary
}

fn anomaly_score(job: &AnomalyDetectionJob, anomaly: &AnomalyResult) -> AnomalyScore {
    AnomalyScore {
        pipeline_name: job.pipeline_name.clone(),
        build_number: anomaly
            .build_number
            .or_else(|| job.input.build_number_at(&anomaly.metric_name, anomaly.timestamp)),
        metric_name: anomaly.metric_name.clone(),
        detector_name: job.detector_name.clone(),
        timestamp: anomaly.timestamp,
        value: anomaly.value,
        score: anomaly.score,
        threshold: anomaly.threshold,
        is_anomaly: anomaly.is_anomaly,
    }
}
