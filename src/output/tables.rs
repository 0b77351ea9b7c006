use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use ci_sentinel::models::{AnomalyScore, CollectionStatus, QueueItem};
use ci_sentinel::CycleReport;

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

fn count_cell(value: usize, bad: bool) -> Cell {
    let cell = Cell::new(value);
    match (value, bad) {
        (0, _) => cell,
        (_, true) => cell.fg(TableColor::Red),
        (_, false) => cell.fg(TableColor::Green),
    }
}

/// Red for anomalies, yellow within 20% of the threshold, green otherwise.
pub fn color_coded_score_cell(score: &AnomalyScore) -> Cell {
    let text = format!("{:.2} / {:.2}", score.score, score.threshold);
    if score.is_anomaly {
        Cell::new(text).fg(TableColor::Red)
    } else if score.score.abs() >= score.threshold.abs() * 0.8 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Green)
    }
}

fn status_cell(status: CollectionStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        CollectionStatus::Pending => cell.fg(TableColor::Yellow),
        CollectionStatus::Complete => cell.fg(TableColor::Green),
        CollectionStatus::Partial => cell.fg(TableColor::Cyan),
        CollectionStatus::Error => cell.fg(TableColor::Red),
    }
}

pub fn queue_table(items: &[QueueItem]) -> Table {
    let mut table = create_table();
    table.set_header(cyan_header(&["ID", "Job", "Build", "Status", "Last attempt", "Error"]));
    for item in items {
        table.add_row(vec![
            Cell::new(item.id),
            Cell::new(&item.job_path),
            Cell::new(item.build_number),
            status_cell(item.collection_status),
            Cell::new(item.last_attempt_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(item.error_message.as_deref().unwrap_or("")),
        ]);
    }
    table
}

pub fn detectors_table(names: &[&str]) -> Table {
    let mut table = create_table();
    table.set_header(cyan_header(&["Detector"]));
    for name in names {
        table.add_row(vec![Cell::new(name)]);
    }
    table
}

pub fn anomalies_table(scores: &[AnomalyScore]) -> Table {
    let mut table = create_table();
    table.set_header(cyan_header(&[
        "Pipeline", "Build", "Metric", "Detector", "Timestamp", "Value", "Score / Threshold",
    ]));
    for score in scores {
        table.add_row(vec![
            Cell::new(&score.pipeline_name),
            Cell::new(score.build_number.map_or_else(|| "-".to_string(), |n| n.to_string())),
            Cell::new(&score.metric_name),
            Cell::new(&score.detector_name),
            Cell::new(score.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(format!("{:.2}", score.value)),
            color_coded_score_cell(score),
        ]);
    }
    table
}

pub fn cycle_table(report: &CycleReport) -> Table {
    let CycleReport {
        reconcile,
        queue,
        detection,
    } = report;

    let mut table = create_table();
    table.set_header(cyan_header(&["Stage", "Done", "Skipped", "Failed"]));
    table.add_row(vec![
        Cell::new("Queued builds"),
        count_cell(reconcile.queued, false),
        Cell::new(reconcile.already_queued),
        count_cell(reconcile.failed_pipelines, true),
    ]);
    table.add_row(vec![
        Cell::new("Stored builds"),
        count_cell(queue.stored + queue.already_stored, false),
        Cell::new(queue.still_running + queue.deferred),
        count_cell(queue.errored, true),
    ]);
    table.add_row(vec![
        Cell::new("Detection jobs"),
        count_cell(detection.succeeded, false),
        Cell::new(detection.not_run),
        count_cell(detection.failed, true),
    ]);
    table.add_row(vec![
        Cell::new("Scores stored"),
        Cell::new(detection.scores_stored),
        Cell::new(""),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("Anomalies flagged"),
        count_cell(detection.anomalies_flagged, true),
        Cell::new(""),
        Cell::new(""),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn score(value: f64, threshold: f64, is_anomaly: bool) -> AnomalyScore {
        AnomalyScore {
            pipeline_name: "api".to_string(),
            build_number: None,
            metric_name: "duration".to_string(),
            detector_name: "zscore".to_string(),
            timestamp: Utc::now(),
            value: 540.0,
            score: value,
            threshold,
            is_anomaly,
        }
    }

    #[test]
    fn test_score_cell_colours() {
        let cell = color_coded_score_cell(&score(3.2, 2.0, true));
        assert_eq!(cell.content(), "3.20 / 2.00");

        let table = anomalies_table(&[score(3.2, 2.0, true), score(1.0, 2.0, false)]);
        let rendered = table.to_string();
        assert!(rendered.contains("zscore"));
        assert!(rendered.contains("1.00 / 2.00"));
    }

    #[test]
    fn test_queue_table_shows_errors() {
        let items = vec![QueueItem {
            id: 3,
            job_path: "job/api".to_string(),
            build_number: 42,
            collection_status: CollectionStatus::Error,
            last_attempt_at: Utc::now(),
            error_message: Some("HTTP 404".to_string()),
        }];
        let rendered = queue_table(&items).to_string();
        assert!(rendered.contains("job/api"));
        assert!(rendered.contains("HTTP 404"));
        assert!(rendered.contains("error"));
    }
}
