use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_red, bright_yellow};

/// Spinner for one stage of a sentinel run ("Stage 2/3: Processing queue").
pub struct StageProgress {
    pb: ProgressBar,
    label: String,
}

impl StageProgress {
    /// Prints the section header shown above the first stage.
    pub fn header() {
        eprintln!("{}  {}", bright("⚙️"), bright("Stages").underlined());
    }

    pub fn start(index: usize, total: usize, label: &str) -> Self {
        let label = format!("Stage {index}/{total}: {label}");
        let pb = create_spinner(bright_yellow(&label).to_string());
        Self { pb, label }
    }

    pub fn finish(self, detail: &str) {
        self.pb
            .finish_with_message(bright_green(format!("{} ✓ {detail}", self.label)).to_string());
    }

    pub fn fail(self, detail: &str) {
        self.pb
            .finish_with_message(bright_red(format!("{} ✗ {detail}", self.label)).to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    let style = ProgressStyle::default_spinner()
        .template("  {msg} {spinner}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
