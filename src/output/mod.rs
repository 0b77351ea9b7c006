mod progress;
mod styling;
mod tables;

pub use progress::StageProgress;
pub use styling::{count, dim, magenta_bold, queue_status};
pub use tables::{anomalies_table, cycle_table, detectors_table, queue_table};

/// Prints the banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🛰  ci-sentinel"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Jenkins build reconciler and anomaly detector")
    );
}
