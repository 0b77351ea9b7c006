use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use ci_sentinel::config::Config;
use ci_sentinel::models::CollectionStatus;
use ci_sentinel::sentinel::discover_detectors;
use ci_sentinel::store::{FileStore, Store};
use ci_sentinel::{CycleReport, Sentinel};

use crate::output::{
    anomalies_table, count, cycle_table, detectors_table, dim, queue_status, queue_table,
    StageProgress,
};

#[derive(Parser)]
#[command(name = "ci-sentinel")]
#[command(author, version, about = "Jenkins build reconciler and anomaly detector", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./sentinel.{toml,json,yaml,yml})
    #[arg(short, long, global = true, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every pipeline, process the queue, then run detection
    Run,

    /// Queue build numbers that Jenkins knows about but the store does not
    Reconcile,

    /// Fetch queued builds and store the finished ones
    ProcessQueue,

    /// Run the configured detectors over stored builds
    Detect,

    /// List the detectors found in the detector directory
    Detectors,

    /// Show queued builds
    Queue {
        #[arg(short, long)]
        status: Option<CollectionStatus>,
    },

    /// Move every errored queue item back to pending
    RequeueErrors,

    /// Show stored anomaly scores
    Anomalies {
        #[arg(short, long)]
        pipeline: Option<String>,

        #[arg(long, default_value_t = false)]
        only_anomalies: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping running detectors");
            trigger.cancel();
        }
    });
    token
}

fn open_store(config: &Config) -> Result<FileStore> {
    let path = config.store_path()?;
    FileStore::open(&path).with_context(|| format!("Failed to open store: {}", path.display()))
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    async fn execute_run(&self, config: Config) -> Result<()> {
        let sentinel = Sentinel::from_config(config)?;
        let cancel = cancel_on_interrupt();

        StageProgress::header();

        let stage = StageProgress::start(1, 3, "Reconciling pipelines");
        let reconcile = sentinel.reconcile().await;
        stage.finish(&format!("{} builds queued", reconcile.queued));

        let stage = StageProgress::start(2, 3, "Processing build queue");
        let queue = match sentinel.process_queue().await {
            Ok(queue) => {
                stage.finish(&format!("{} builds stored", queue.stored));
                queue
            }
            Err(e) => {
                stage.fail(&e.to_string());
                return Err(e.into());
            }
        };

        let stage = StageProgress::start(3, 3, "Running anomaly detection");
        let detection = match sentinel.detect(&cancel).await {
            Ok(detection) => {
                stage.finish(&format!("{} anomalies flagged", detection.anomalies_flagged));
                detection
            }
            Err(e) => {
                stage.fail(&e.to_string());
                return Err(e.into());
            }
        };

        let report = CycleReport {
            reconcile,
            queue,
            detection,
        };
        println!("\n{}", cycle_table(&report));
        Ok(())
    }

    fn execute_detectors(config: &Config) -> Result<()> {
        let processing = &config.anomaly_processing;
        let registry = discover_detectors(processing)?;

        if registry.is_empty() {
            println!(
                "{}",
                dim(format!(
                    "No detectors found in {}",
                    processing.detector_directory.display()
                ))
            );
            return Ok(());
        }

        println!("{}", detectors_table(&registry.list()));
        Ok(())
    }

    async fn execute_queue(config: &Config, status: Option<CollectionStatus>) -> Result<()> {
        let store = open_store(config)?;
        let statuses: Vec<CollectionStatus> = status.into_iter().collect();
        let items = store.queue_items(&statuses).await?;

        match status {
            Some(status) => println!("{} queue items: {}", queue_status(status), items.len()),
            None => println!("Queue items: {}", items.len()),
        }
        if !items.is_empty() {
            println!("{}", queue_table(&items));
        }
        Ok(())
    }

    async fn execute_requeue(config: &Config) -> Result<()> {
        let store = open_store(config)?;
        let reset = store.requeue_errors().await?;
        info!("Requeued {reset} errored queue items");
        println!("Requeued errored items: {}", count(reset, false));
        Ok(())
    }

    async fn execute_anomalies(
        config: &Config,
        pipeline: Option<&str>,
        only_anomalies: bool,
        json: bool,
    ) -> Result<()> {
        let store = open_store(config)?;
        let mut scores = store.anomaly_scores(pipeline).await?;
        if only_anomalies {
            scores.retain(|score| score.is_anomaly);
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&scores)?);
            return Ok(());
        }

        let flagged = scores.iter().filter(|score| score.is_anomaly).count();
        println!("Scores: {}  Anomalies: {}", scores.len(), count(flagged, true));
        if !scores.is_empty() {
            println!("{}", anomalies_table(&scores));
        }
        Ok(())
    }

    pub async fn execute(&self, config: Config) -> Result<()> {
        match &self.command {
            Commands::Run => self.execute_run(config).await,
            Commands::Reconcile => {
                let summary = Sentinel::from_config(config)?.reconcile().await;
                println!(
                    "Queued: {}  Already queued: {}  Failed pipelines: {}",
                    count(summary.queued, false),
                    summary.already_queued,
                    count(summary.failed_pipelines, true)
                );
                Ok(())
            }
            Commands::ProcessQueue => {
                let summary = Sentinel::from_config(config)?.process_queue().await?;
                println!(
                    "Stored: {}  Running: {}  Errored: {}  Deferred: {}",
                    count(summary.stored, false),
                    summary.still_running,
                    count(summary.errored, true),
                    summary.deferred
                );
                Ok(())
            }
            Commands::Detect => {
                let sentinel = Sentinel::from_config(config)?;
                let summary = sentinel.detect(&cancel_on_interrupt()).await?;
                println!(
                    "Jobs: {}  Failed: {}  Scores: {}  Anomalies: {}",
                    summary.jobs,
                    count(summary.failed, true),
                    summary.scores_stored,
                    count(summary.anomalies_flagged, true)
                );
                Ok(())
            }
            Commands::Detectors => Self::execute_detectors(&config),
            Commands::Queue { status } => Self::execute_queue(&config, *status).await,
            Commands::RequeueErrors => Self::execute_requeue(&config).await,
            Commands::Anomalies {
                pipeline,
                only_anomalies,
                json,
            } => {
                Self::execute_anomalies(&config, pipeline.as_deref(), *only_anomalies, *json).await
            }
        }
    }
}
