use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::registry::DetectorRegistry;
use super::types::{AnomalyDetectionJob, BatchDetectionInput, DetectionOutput, DetectionResult};
use crate::error::DetectorError;

/// Runs `jobs` on a pool of at most `max_parallel` workers.
///
/// `results[i]` always answers `jobs[i]`. Workers claim job indices from a
/// shared counter, so each index is owned by exactly one worker and only that
/// worker produces its result. Per-job failures (unknown detector, execution
/// or parse failure, empty output, a panicking in-process detector) are
/// recorded in the slot and never stop other jobs.
///
/// A slot stays `None` when the job was never attempted or was aborted by
/// `cancel`; once cancelled, workers stop claiming new jobs and in-flight
/// detector processes are killed.
pub async fn run_detections(
    cancel: &CancellationToken,
    registry: &Arc<DetectorRegistry>,
    jobs: Vec<AnomalyDetectionJob>,
    max_parallel: usize,
) -> Vec<Option<DetectionResult>> {
    if jobs.is_empty() {
        return Vec::new();
    }

    let total = jobs.len();
    let workers = max_parallel.clamp(1, total);
    let jobs: Arc<[AnomalyDetectionJob]> = jobs.into();
    let next = Arc::new(AtomicUsize::new(0));

    debug!("Dispatching {total} detection jobs on {workers} workers");

    let mut pool = JoinSet::new();
    for worker in 0..workers {
        let jobs = Arc::clone(&jobs);
        let next = Arc::clone(&next);
        let registry = Arc::clone(registry);
        let cancel = cancel.clone();
        pool.spawn(async move { run_worker(worker, &jobs, &next, &registry, &cancel).await });
    }

    let mut results: Vec<Option<DetectionResult>> = (0..total).map(|_| None).collect();
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(completed) => {
                for (index, result) in completed {
                    debug_assert!(results[index].is_none(), "job {index} produced twice");
                    results[index] = Some(result);
                }
            }
            Err(e) => error!("Detection worker terminated abnormally: {e}"),
        }
    }

    let finished = results.iter().filter(|slot| slot.is_some()).count();
    if finished < total {
        info!("Detection run stopped early: finished={finished} total={total}");
    }

    results
}

/// Claims and runs jobs until none are left or the run is cancelled.
async fn run_worker(
    worker: usize,
    jobs: &[AnomalyDetectionJob],
    next: &AtomicUsize,
    registry: &DetectorRegistry,
    cancel: &CancellationToken,
) -> Vec<(usize, DetectionResult)> {
    let mut completed = Vec::new();

    while !cancel.is_cancelled() {
        let index = next.fetch_add(1, Ordering::Relaxed);
        let Some(job) = jobs.get(index) else {
            break;
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = AssertUnwindSafe(run_job(job, registry, cancel)).catch_unwind() => {
                outcome.unwrap_or_else(|panic| Err(DetectorError::Failed {
                    detector: job.detector_name.clone(),
                    message: format!("detector panicked: {}", panic_message(&*panic)),
                }))
            }
        };

        match &outcome {
            Err(DetectorError::Cancelled(_)) => break,
            Err(DetectorError::NotFound(_)) => error!(
                "Detector not found: pipeline={} detector={}",
                job.pipeline_name, job.detector_name
            ),
            Err(e) => error!(
                "Detection failed: pipeline={} detector={} error={e}",
                job.pipeline_name, job.detector_name
            ),
            Ok(_) => debug!(
                "Worker {worker} finished job {index}: pipeline={} detector={}",
                job.pipeline_name, job.detector_name
            ),
        }

        completed.push((
            index,
            DetectionResult {
                pipeline_name: job.pipeline_name.clone(),
                detector_name: job.detector_name.clone(),
                outcome,
            },
        ));
    }

    completed
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Sends a single-pipeline batch and unwraps its only result.
async fn run_job(
    job: &AnomalyDetectionJob,
    registry: &DetectorRegistry,
    cancel: &CancellationToken,
) -> Result<DetectionOutput, DetectorError> {
    let detector = registry.get(&job.detector_name)?;

    let batch = BatchDetectionInput {
        pipelines: vec![job.input.clone()],
    };

    detector
        .detect_anomalies(cancel, &batch, &job.params)
        .await?
        .results
        .into_iter()
        .next()
        .ok_or_else(|| DetectorError::EmptyOutput(job.detector_name.clone()))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::anomaly::{
        BatchDetectionOutput, DetectionInput, DetectionMetadata, DetectorParams, FnDetector,
    };

    fn job(index: usize, detector: &str, delay_ms: u64) -> AnomalyDetectionJob {
        let mut params = DetectorParams::new();
        params.insert("index".to_string(), index.to_string());
        params.insert("delay_ms".to_string(), delay_ms.to_string());

        AnomalyDetectionJob {
            pipeline_name: format!("pipeline-{index}"),
            detector_name: detector.to_string(),
            input: DetectionInput {
                pipeline_name: format!("pipeline-{index}"),
                time_window_hours: 24,
                metrics: vec!["duration".to_string()],
                time_series: vec![],
            },
            params,
        }
    }

    fn param(params: &DetectorParams, key: &str) -> u64 {
        params.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    /// Sleeps `delay_ms`, then reports its job index as `processed_points`.
    fn sleepy(in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> FnDetector {
        FnDetector::new("sleepy", move |_input, params: DetectorParams| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(param(&params, "delay_ms"))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);

                Ok(BatchDetectionOutput {
                    results: vec![DetectionOutput {
                        anomalies: vec![],
                        metadata: DetectionMetadata {
                            processed_points: param(&params, "index"),
                            ..DetectionMetadata::default()
                        },
                    }],
                })
            }
        })
    }

    fn registry_with(detectors: Vec<Arc<dyn crate::anomaly::Detector>>) -> Arc<DetectorRegistry> {
        let mut builder = DetectorRegistry::builder();
        for detector in detectors {
            builder.register(detector);
        }
        Arc::new(builder.build())
    }

    #[tokio::test]
    async fn test_empty_jobs_return_immediately() {
        let registry = registry_with(vec![]);
        let results = run_detections(&CancellationToken::new(), &registry, vec![], 4).await;
        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_follow_job_order_despite_completion_order() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![Arc::new(sleepy(in_flight, Arc::clone(&peak)))]);

        let n = 8;
        let max_parallel = 3;
        // Earlier jobs sleep longest, so completion order is roughly reversed.
        let jobs: Vec<_> = (0..n)
            .map(|i| job(i, "sleepy", ((n - i) * 10) as u64))
            .collect();

        let results = run_detections(&CancellationToken::new(), &registry, jobs, max_parallel).await;

        assert_eq!(results.len(), n);
        for (i, slot) in results.iter().enumerate() {
            let result = slot.as_ref().expect("every job should run");
            assert_eq!(result.pipeline_name, format!("pipeline-{i}"));
            assert_eq!(result.detector_name, "sleepy");
            let output = result.outcome.as_ref().unwrap();
            assert_eq!(output.metadata.processed_points, i as u64);
        }
        assert!(peak.load(Ordering::SeqCst) <= max_parallel);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_job() {
        let empty = FnDetector::new("empty", |_, _| async { Ok(BatchDetectionOutput::default()) });
        let failing = FnDetector::new("failing", |_, _| async {
            Err(DetectorError::Failed {
                detector: "failing".to_string(),
                message: "boom".to_string(),
            })
        });
        let registry = registry_with(vec![
            Arc::new(sleepy(Arc::default(), Arc::default())),
            Arc::new(empty),
            Arc::new(failing),
        ]);

        let jobs = vec![
            job(0, "sleepy", 1),
            job(1, "missing", 0),
            job(2, "empty", 0),
            job(3, "failing", 0),
            job(4, "sleepy", 1),
        ];

        let results = run_detections(&CancellationToken::new(), &registry, jobs, 2).await;
        let outcomes: Vec<_> = results
            .iter()
            .map(|slot| &slot.as_ref().unwrap().outcome)
            .collect();

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(DetectorError::NotFound(name)) if name == "missing"));
        assert!(matches!(outcomes[2], Err(DetectorError::EmptyOutput(name)) if name == "empty"));
        assert!(matches!(outcomes[3], Err(DetectorError::Failed { .. })));
        assert!(outcomes[4].is_ok());
    }

    #[tokio::test]
    async fn test_panicking_detector_does_not_lose_sibling_results() {
        let boom = FnDetector::new("boom", |_, _| async {
            if true {
                panic!("detector blew up");
            }
            Ok(BatchDetectionOutput::default())
        });
        let registry = registry_with(vec![
            Arc::new(sleepy(Arc::default(), Arc::default())),
            Arc::new(boom),
        ]);

        let jobs = vec![
            job(0, "sleepy", 0),
            job(1, "sleepy", 0),
            job(2, "boom", 0),
            job(3, "sleepy", 0),
        ];

        let results = run_detections(&CancellationToken::new(), &registry, jobs, 1).await;

        assert!(results.iter().all(Option::is_some));
        let outcomes: Vec<_> = results
            .iter()
            .map(|slot| &slot.as_ref().unwrap().outcome)
            .collect();
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_ok());
        assert!(matches!(
            outcomes[2],
            Err(DetectorError::Failed { message, .. }) if message.contains("detector blew up")
        ));
        assert_eq!(outcomes[3].as_ref().unwrap().metadata.processed_points, 3);
    }

    #[tokio::test]
    async fn test_parallelism_clamped_to_at_least_one_worker() {
        let registry = registry_with(vec![Arc::new(sleepy(Arc::default(), Arc::default()))]);
        let jobs = vec![job(0, "sleepy", 0), job(1, "sleepy", 0)];

        let results = run_detections(&CancellationToken::new(), &registry, jobs, 0).await;
        assert!(results.iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_leaves_slots_empty() {
        let registry = registry_with(vec![Arc::new(sleepy(Arc::default(), Arc::default()))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = run_detections(&cancel, &registry, vec![job(0, "sleepy", 0)], 2).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_jobs() {
        let registry = registry_with(vec![Arc::new(sleepy(Arc::default(), Arc::default()))]);
        let jobs = vec![job(0, "sleepy", 0), job(1, "sleepy", 30_000), job(2, "sleepy", 30_000)];

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let results = run_detections(&cancel, &registry, jobs, 1).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(results[0].as_ref().unwrap().outcome.is_ok());
        assert!(results[1].is_none());
        assert!(results[2].is_none());
    }
}
