//! Best-effort install progress notification
//!
//! Feedback sinks are purely observational: they never influence the outcome
//! of an install and must not fail.

use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{error, info};

/// Terminal outcome of an observed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    Succeeded,
    Failed(String),
}

/// Sink for status-line / activity-indicator style notifications
#[cfg_attr(test, mockall::automock)]
pub trait InstallFeedback: Send + Sync {
    /// A long-running task (`"Installing Node.js"`, `"LSP-foo: installing server"`) started
    fn on_started(&self, title: &str);

    /// Intermediate message for a running task
    fn on_progress(&self, title: &str, message: &str);

    /// The task finished
    fn on_finished(&self, title: &str, outcome: &FeedbackOutcome);
}

/// Feedback that only writes log records
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl InstallFeedback for LogFeedback {
    fn on_started(&self, title: &str) {
        info!(task = %title, "Started");
    }

    fn on_progress(&self, title: &str, message: &str) {
        info!(task = %title, %message, "Progress");
    }

    fn on_finished(&self, title: &str, outcome: &FeedbackOutcome) {
        match outcome {
            FeedbackOutcome::Succeeded => info!(task = %title, "Finished"),
            FeedbackOutcome::Failed(reason) => error!(task = %title, %reason, "Failed"),
        }
    }
}

/// Terminal activity indicator: one spinner per running task
#[derive(Default)]
pub struct SpinnerFeedback {
    spinners: DashMap<String, ProgressBar>,
}

impl SpinnerFeedback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstallFeedback for SpinnerFeedback {
    fn on_started(&self, title: &str) {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(title.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        self.spinners.insert(title.to_string(), bar);
    }

    fn on_progress(&self, title: &str, message: &str) {
        if let Some(bar) = self.spinners.get(title) {
            bar.set_message(format!("{title}: {message}"));
        }
    }

    fn on_finished(&self, title: &str, outcome: &FeedbackOutcome) {
        let Some((_, bar)) = self.spinners.remove(title) else {
            return;
        };
        match outcome {
            FeedbackOutcome::Succeeded => bar.finish_with_message(format!("✅ {title}")),
            FeedbackOutcome::Failed(reason) => {
                bar.abandon_with_message(format!("❌ {title}: {reason}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinner_tracks_running_tasks() {
        let feedback = SpinnerFeedback::new();
        feedback.on_started("Installing Node.js");
        assert!(feedback.spinners.contains_key("Installing Node.js"));

        feedback.on_progress("Installing Node.js", "extracting");
        feedback.on_finished("Installing Node.js", &FeedbackOutcome::Succeeded);
        assert!(feedback.spinners.is_empty());
    }

    #[test]
    fn test_finishing_unknown_task_is_ignored() {
        let feedback = SpinnerFeedback::new();
        feedback.on_finished("never started", &FeedbackOutcome::Failed("boom".into()));
        assert!(feedback.spinners.is_empty());
    }
}
