use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::types::{BatchDetectionInput, BatchDetectionOutput, DetectorParams};
use crate::error::DetectorError;

/// A named component that scores metric time series for anomalies.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Scores every pipeline in `input`. Implementations should stop early
    /// and return `DetectorError::Cancelled` once `cancel` fires.
    async fn detect_anomalies(
        &self,
        cancel: &CancellationToken,
        input: &BatchDetectionInput,
        params: &DetectorParams,
    ) -> Result<BatchDetectionOutput, DetectorError>;
}

/// Program (plus leading arguments) that executes detector scripts, e.g. `uv run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runner {
    program: String,
    args: Vec<String>,
}

impl Runner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a configured command line into program and arguments.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

/// Detector backed by an external script.
///
/// The batch input is written as JSON to the child's stdin, params become
/// `--key value` arguments after the script path, and the child's stdout is
/// parsed as the batch output.
pub struct ScriptDetector {
    name: String,
    script_path: PathBuf,
    runner: Runner,
}

impl ScriptDetector {
    /// The detector is named after the script's file stem.
    pub fn new(script_path: impl Into<PathBuf>, runner: Runner) -> Self {
        let script_path = script_path.into();
        let name = script_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            name,
            script_path,
            runner,
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    fn command(&self, params: &DetectorParams) -> Command {
        let mut command = Command::new(&self.runner.program);
        command.args(&self.runner.args).arg(&self.script_path);
        for (key, value) in params {
            command.arg(format!("--{key}")).arg(value);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Detector for ScriptDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect_anomalies(
        &self,
        cancel: &CancellationToken,
        input: &BatchDetectionInput,
        params: &DetectorParams,
    ) -> Result<BatchDetectionOutput, DetectorError> {
        let started = Instant::now();

        let payload = serde_json::to_vec(input).map_err(|source| DetectorError::Serialize {
            detector: self.name.clone(),
            source,
        })?;

        let mut child = self
            .command(params)
            .spawn()
            .map_err(|source| DetectorError::Spawn {
                detector: self.name.clone(),
                source,
            })?;

        // Feed stdin concurrently so a chatty child cannot fill its stdout pipe
        // while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await
            })
        });

        // Dropping the wait future kills the child (kill_on_drop).
        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Detector {} cancelled, killing child process", self.name);
                return Err(DetectorError::Cancelled(self.name.clone()));
            }
            output = child.wait_with_output() => output.map_err(|source| DetectorError::Spawn {
                detector: self.name.clone(),
                source,
            })?,
        };

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Detector {} did not read all of stdin: {e}", self.name),
                Err(e) => debug!("Detector {} stdin writer failed: {e}", self.name),
            }
        }

        if !output.status.success() {
            return Err(DetectorError::Execution {
                detector: self.name.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: BatchDetectionOutput =
            serde_json::from_slice(&output.stdout).map_err(|source| {
                DetectorError::MalformedOutput {
                    detector: self.name.clone(),
                    source,
                }
            })?;

        info!(
            "Detector completed: detector={} duration={:?}",
            self.name,
            started.elapsed()
        );

        Ok(parsed)
    }
}

type DetectFn = dyn Fn(BatchDetectionInput, DetectorParams) -> BoxFuture<'static, Result<BatchDetectionOutput, DetectorError>>
    + Send
    + Sync;

/// In-process detector wrapping an async function with the detector contract.
pub struct FnDetector {
    name: String,
    detect: Box<DetectFn>,
}

impl FnDetector {
    pub fn new<F, Fut>(name: impl Into<String>, detect: F) -> Self
    where
        F: Fn(BatchDetectionInput, DetectorParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BatchDetectionOutput, DetectorError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            detect: Box::new(move |input, params| Box::pin(detect(input, params))),
        }
    }
}

#[async_trait]
impl Detector for FnDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect_anomalies(
        &self,
        cancel: &CancellationToken,
        input: &BatchDetectionInput,
        params: &DetectorParams,
    ) -> Result<BatchDetectionOutput, DetectorError> {
        let run = (self.detect)(input.clone(), params.clone());
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DetectorError::Cancelled(self.name.clone())),
            output = run => output,
        }
    }
}
