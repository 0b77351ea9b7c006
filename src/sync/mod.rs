//! Keeps the local store in step with Jenkins and feeds stored builds to detectors.

mod detection;
mod queue;
mod reconcile;

pub use detection::{persist_scores, AnomalyPipelineBuilder, ScoreSummary};
pub use queue::{QueueProcessor, QueueSummary};
pub use reconcile::{BuildReconciler, ReconcileSummary};
