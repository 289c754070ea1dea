//! Terminal output for the client subcommands: a spinner while waiting on a
//! job and coloured outcome lines.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::registry::{JobState, JobSummary};

/// Spinner shown while a submitted job is queued or running.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        // The template is a constant; fall back to the default style if it ever fails to parse.
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{label}: submitting"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn update(&self, summary: &JobSummary) {
        let mut message = format!("{} {}", summary.id, summary.state);
        if summary.requeues > 0 {
            message.push_str(&format!(" (re-queued {}x)", summary.requeues));
        }
        self.pb.set_message(message);
    }

    /// Print a transient problem (e.g. server briefly unavailable) above the spinner.
    pub fn warn(&self, message: &str) {
        self.pb
            .println(format!("  {} {message}", self.yellow.apply_to("↻")));
    }

    /// Stop the spinner and print the final state.
    pub fn finish(&self, summary: &JobSummary) {
        self.pb.finish_and_clear();
        match summary.state {
            JobState::Completed => {
                println!(
                    "  {} Job {} completed",
                    self.green.apply_to("✓"),
                    summary.id
                );
            }
            JobState::Failed => {
                println!(
                    "  {} Job {} failed: {}",
                    self.red.apply_to("✗"),
                    summary.id,
                    summary.error.as_deref().unwrap_or("unknown error")
                );
            }
            state => {
                println!("  {} Job {} is {state}", self.yellow.apply_to("…"), summary.id);
            }
        }
    }

    pub fn abandon(&self) {
        self.pb.finish_and_clear();
    }
}

/// Pretty-print a job summary as JSON, coloured by state.
pub fn print_summary(summary: &JobSummary) {
    let style = match summary.state {
        JobState::Completed => Style::new().green(),
        JobState::Failed => Style::new().red(),
        _ => Style::new().yellow(),
    };
    println!(
        "{}",
        style.apply_to(serde_json::to_string_pretty(summary).unwrap_or_default())
    );
}
