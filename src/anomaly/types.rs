use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

/// Detector arguments, passed as `--key value` pairs in insertion order.
pub type DetectorParams = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub build_number: u32,
}

/// Ordered samples of one metric for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTimeSeries {
    pub metric_name: String,
    pub points: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionInput {
    pub pipeline_name: String,
    pub time_window_hours: u32,
    pub metrics: Vec<String>,
    pub time_series: Vec<MetricTimeSeries>,
}

impl DetectionInput {
    /// Build number of the point a detector reported on, if it can be matched.
    pub fn build_number_at(&self, metric_name: &str, timestamp: DateTime<Utc>) -> Option<u32> {
        self.time_series
            .iter()
            .filter(|series| series.metric_name == metric_name)
            .flat_map(|series| series.points.iter())
            .find(|point| point.timestamp == timestamp)
            .map(|point| point.build_number)
    }
}

/// What a detector reads on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDetectionInput {
    pub pipelines: Vec<DetectionInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub score: f64,
    pub threshold: f64,
    pub is_anomaly: bool,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector_name: Option<String>,
    #[serde(default)]
    pub processed_points: u64,
    // Older detector scripts misspell this key.
    #[serde(default, alias = "exeuction_time_ms")]
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutput {
    #[serde(default)]
    pub anomalies: Vec<AnomalyResult>,
    #[serde(default)]
    pub metadata: DetectionMetadata,
}

/// What a detector writes on stdout; `results[i]` answers `pipelines[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchDetectionOutput {
    #[serde(default)]
    pub results: Vec<DetectionOutput>,
}

/// One pipeline's detection work for a single cycle.
#[derive(Debug, Clone)]
pub struct AnomalyDetectionJob {
    pub pipeline_name: String,
    pub detector_name: String,
    pub input: DetectionInput,
    pub params: DetectorParams,
}

/// Outcome of one job. Failures are per job and never abort siblings.
#[derive(Debug)]
pub struct DetectionResult {
    pub pipeline_name: String,
    pub detector_name: String,
    pub outcome: Result<DetectionOutput, DetectorError>,
}
