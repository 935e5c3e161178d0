//! Terminal progress for `questforge generate`, rendered with `indicatif`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::Stage;
use crate::progress::ProgressReporter;

/// Spinner plus a stage counter.
///
/// Stage announcements are printed above the spinner as permanent lines and
/// bump the counter; other reports only replace the spinner message.
pub struct SpinnerReporter {
    bar: ProgressBar,
    stages_seen: AtomicUsize,
    verbose: bool,
}

impl SpinnerReporter {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(format!("[0/{}]", Stage::ALL.len()));
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            stages_seen: AtomicUsize::new(0),
            verbose,
        }
    }

    fn is_stage_announcement(message: &str) -> bool {
        Stage::ALL.iter().any(|s| s.announcement() == message)
    }
}

impl ProgressReporter for SpinnerReporter {
    fn report(&self, message: &str) {
        if Self::is_stage_announcement(message) {
            let n = self.stages_seen.fetch_add(1, Ordering::Relaxed) + 1;
            self.bar.set_prefix(format!("[{}/{}]", n, Stage::ALL.len()));
            self.bar.println(format!("{}", style(message).bold()));
        } else if message.starts_with("⚠️") {
            self.bar.println(format!("{}", style(message).yellow()));
        }
        self.bar.set_message(message.to_string());
    }

    fn output(&self, text: &str) {
        if self.verbose {
            self.bar.println(format!("{}", style(text).dim()));
        }
    }

    fn completed(&self, message: &str) {
        self.bar
            .finish_with_message(format!("{}", style(message).green().bold()));
    }

    fn failed(&self, message: &str) {
        self.bar.abandon_with_message(format!("{}", style(message).red().bold()));
    }
}
