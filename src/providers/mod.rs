pub mod jenkins;

use async_trait::async_trait;

use crate::error::Result;

pub use jenkins::{BuildDetail, JenkinsClient, RetryPolicy};

/// Read side of a CI server, as consumed by reconciliation and queue processing.
#[async_trait]
pub trait BuildSource: Send + Sync {
    /// Build numbers known to the server for a job, in server order.
    async fn list_build_numbers(&self, job_path: &str) -> Result<Vec<u32>>;

    async fn get_build_detail(&self, job_path: &str, build_number: u32) -> Result<BuildDetail>;

    /// Plain-text console output of a build.
    async fn get_console_log(&self, job_path: &str, build_number: u32) -> Result<String>;
}
