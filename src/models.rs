use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued build.
///
/// `Error` is terminal unless the queue is configured to retry errored items
/// or they are requeued by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Pending,
    Complete,
    Partial,
    Error,
}

impl CollectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "complete" => Ok(Self::Complete),
            "partial" => Ok(Self::Partial),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown collection status: {other}")),
        }
    }
}

/// A build number known upstream but not yet persisted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    pub job_path: String,
    pub build_number: u32,
    pub collection_status: CollectionStatus,
    pub last_attempt_at: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Final result of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failure,
    Aborted,
    Unstable,
    NotBuilt,
    Unknown,
}

impl BuildStatus {
    /// Maps a Jenkins `result` string; anything unrecognised is `Unknown`.
    pub fn from_jenkins_result(result: Option<&str>) -> Self {
        match result.map(str::to_ascii_uppercase).as_deref() {
            Some("SUCCESS") => Self::Success,
            Some("FAILURE") => Self::Failure,
            Some("ABORTED") => Self::Aborted,
            Some("UNSTABLE") => Self::Unstable,
            Some("NOT_BUILT") => Self::NotBuilt,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
            Self::Unstable => "unstable",
            Self::NotBuilt => "not_built",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_failing(self) -> bool {
        matches!(self, Self::Failure | Self::Unstable)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed build persisted locally. Unique per (pipeline_name, build_number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub pipeline_name: String,
    pub build_number: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BuildStatus,
    #[serde(default)]
    pub waiting_time_seconds: Option<f64>,
    #[serde(default)]
    pub buildable_time_seconds: Option<f64>,
    #[serde(default)]
    pub blocked_time_seconds: Option<f64>,
    #[serde(default)]
    pub building_time_seconds: Option<f64>,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
}

impl BuildRecord {
    pub fn metric_value(&self, metric: BuildMetric) -> Option<f64> {
        match metric {
            BuildMetric::Duration => {
                #[allow(clippy::cast_precision_loss)]
                let millis = (self.end_time - self.start_time).num_milliseconds() as f64;
                Some(millis / 1000.0)
            }
            BuildMetric::WaitingTime => self.waiting_time_seconds,
            BuildMetric::BuildableTime => self.buildable_time_seconds,
            BuildMetric::BlockedTime => self.blocked_time_seconds,
            BuildMetric::BuildingTime => self.building_time_seconds,
        }
    }
}

/// Metrics that can be derived from a persisted build, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildMetric {
    Duration,
    WaitingTime,
    BuildableTime,
    BlockedTime,
    BuildingTime,
}

impl BuildMetric {
    pub const ALL: [BuildMetric; 5] = [
        Self::Duration,
        Self::WaitingTime,
        Self::BuildableTime,
        Self::BlockedTime,
        Self::BuildingTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duration => "duration",
            Self::WaitingTime => "waiting_time_seconds",
            Self::BuildableTime => "buildable_time_seconds",
            Self::BlockedTime => "blocked_time_seconds",
            Self::BuildingTime => "building_time_seconds",
        }
    }
}

impl FromStr for BuildMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| format!("unknown metric: {s}"))
    }
}

impl fmt::Display for BuildMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detector's persisted judgment about one time-series point. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub pipeline_name: String,
    #[serde(default)]
    pub build_number: Option<u32>,
    pub metric_name: String,
    pub detector_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub score: f64,
    pub threshold: f64,
    pub is_anomaly: bool,
}

/// Derives the stored pipeline name from a job path (`job/api-build/` → `api-build`).
pub fn pipeline_name(job_path: &str) -> String {
    let cleaned = job_path.trim_end_matches('/');
    cleaned.strip_prefix("job/").unwrap_or(cleaned).to_string()
}
