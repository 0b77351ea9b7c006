use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Jenkins API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Jenkins API returned retryable status {0}")]
    RetryableStatus(u16),

    #[error("Jenkins API request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<SentinelError>,
    },

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed build {job_path}#{build_number}: {reason}")]
    MalformedBuild {
        job_path: String,
        build_number: u32,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Detector discovery failed: {0}")]
    Discovery(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SentinelError>;

/// Failures reported by a persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("build {pipeline_name}#{build_number} already exists")]
    DuplicateBuild {
        pipeline_name: String,
        build_number: u32,
    },

    #[error("queue item for {job_path}#{build_number} already exists")]
    DuplicateQueueItem { job_path: String, build_number: u32 },

    #[error("queue item {0} not found")]
    QueueItemNotFound(u64),

    #[error("failed to write store file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Per-job detection failures. None of these abort sibling jobs.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector {0} not found")]
    NotFound(String),

    #[error("failed to serialize input for {detector}: {source}")]
    Serialize {
        detector: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to start detector {detector}: {source}")]
    Spawn {
        detector: String,
        #[source]
        source: std::io::Error,
    },

    #[error("detector {detector} exited with {status}; stderr: {stderr}")]
    Execution {
        detector: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse output from {detector}: {source}")]
    MalformedOutput {
        detector: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("detector {0} returned no results")]
    EmptyOutput(String),

    #[error("detector {detector} failed: {message}")]
    Failed { detector: String, message: String },

    #[error("detector {0} was cancelled")]
    Cancelled(String),
}
