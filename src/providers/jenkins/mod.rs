mod client;
mod timing;
mod types;

pub use client::{JenkinsClient, RetryPolicy};
pub use timing::{extract_timing_metrics, extract_triggered_by, TimingMetrics};
pub use types::BuildDetail;
