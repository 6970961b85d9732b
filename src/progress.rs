//! Terminal progress for the wait loop.

use indicatif::{ProgressBar, ProgressStyle};
use jobkit::{AttemptReport, UnitId, UnitStatus, WaitProgress};
use std::time::Duration;

use crate::ui;

/// Create a spinner with a message
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Spinner that follows an execution unit until it finishes
pub struct UnitSpinner {
    bar: Option<ProgressBar>,
    unit: String,
    quiet: bool,
}

impl UnitSpinner {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: None,
            unit: String::new(),
            quiet,
        }
    }
}

impl WaitProgress for UnitSpinner {
    fn on_submitted(&mut self, id: &UnitId) {
        self.unit = id.to_string();
        if !self.quiet {
            self.bar = Some(spinner(&format!("{id}: submitted")));
        }
    }

    fn on_poll(&mut self, status: UnitStatus, elapsed: Duration, timeout: Duration) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!(
                "{}: {} ({} of {})",
                self.unit,
                status,
                ui::format_duration(elapsed),
                ui::format_duration(timeout)
            ));
        }
    }

    fn on_finished(&mut self, _report: &AttemptReport) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
