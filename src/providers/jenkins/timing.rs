use super::types::{Action, BuildDetail};

const TIME_IN_QUEUE_ACTION: &str = "jenkins.metrics.impl.TimeInQueueAction";
const CAUSE_ACTION: &str = "hudson.model.CauseAction";

/// Queue and execution timings of a build, in seconds.
///
/// A field is `None` when Jenkins did not report it or reported zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingMetrics {
    pub waiting_time_seconds: Option<f64>,
    pub buildable_time_seconds: Option<f64>,
    pub blocked_time_seconds: Option<f64>,
    pub building_time_seconds: Option<f64>,
}

fn positive_seconds(millis: Option<f64>) -> Option<f64> {
    millis.filter(|ms| *ms > 0.0).map(|ms| ms / 1000.0)
}

/// Reads the metrics plugin's time-in-queue action, if the build has one.
pub fn extract_timing_metrics(detail: &BuildDetail) -> TimingMetrics {
    let Some(action) = detail
        .actions
        .iter()
        .find(|action| action.class.as_deref() == Some(TIME_IN_QUEUE_ACTION))
    else {
        return TimingMetrics::default();
    };

    TimingMetrics {
        waiting_time_seconds: positive_seconds(action.waiting_time_millis),
        buildable_time_seconds: positive_seconds(action.buildable_time_millis),
        blocked_time_seconds: positive_seconds(action.blocked_time_millis),
        building_time_seconds: positive_seconds(action.executing_time_millis),
    }
}

/// Who started the build: the first non-empty user name among the cause
/// actions, else the first non-empty user id.
pub fn extract_triggered_by(detail: &BuildDetail) -> Option<String> {
    let causes = || {
        detail
            .actions
            .iter()
            .filter(|action: &&Action| action.class.as_deref() == Some(CAUSE_ACTION))
            .flat_map(|action| action.causes.iter())
    };

    let non_empty = |value: &Option<String>| value.as_deref().filter(|v| !v.is_empty()).map(str::to_string);

    causes()
        .find_map(|cause| non_empty(&cause.user_name))
        .or_else(|| causes().find_map(|cause| non_empty(&cause.user_id)))
}
