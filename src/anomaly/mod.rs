//! Pluggable anomaly detection over per-pipeline metric time series.

mod detector;
mod dispatcher;
mod registry;
mod types;

pub use detector::{Detector, FnDetector, Runner, ScriptDetector};
pub use dispatcher::run_detections;
pub use registry::{DetectorRegistry, RegistryBuilder};
pub use types::{
    AnomalyDetectionJob, AnomalyResult, BatchDetectionInput, BatchDetectionOutput,
    DetectionInput, DetectionMetadata, DetectionOutput, DetectionResult, DetectorParams,
    MetricTimeSeries, TimeSeriesPoint,
};
