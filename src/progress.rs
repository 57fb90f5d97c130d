//! Per-step progress for reconcile runs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ApplyResult, DesiredState, ProgressCallback};
use std::time::Duration;

/// Spinner that prints one line per finished step
pub struct StepSpinner {
    bar: Option<ProgressBar>,
    total: usize,
    done: usize,
    quiet: bool,
}

impl StepSpinner {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: None,
            total: 0,
            done: 0,
            quiet,
        }
    }

    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }
}

fn symbol(result: &ApplyResult) -> colored::ColoredString {
    match result {
        ApplyResult::NoChange => "○".dimmed(),
        ApplyResult::Created => "+".green(),
        ApplyResult::Modified => "~".yellow(),
        ApplyResult::Removed => "-".red(),
        ApplyResult::Skipped { .. } => "⊘".dimmed(),
    }
}

impl ProgressCallback for StepSpinner {
    fn on_run_start(&mut self, count: usize, desired: DesiredState) {
        self.total = count;
        self.done = 0;
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {prefix:.bold.dim} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        let verb = match desired {
            DesiredState::Present => "Applying",
            DesiredState::Absent => "Removing",
        };
        bar.set_message(format!("{verb} {count} steps"));
        self.bar = Some(bar);
    }

    fn on_step_start(&mut self, id: &str, description: &str) {
        log::info!("Starting {id}: {description}");
        if let Some(bar) = &self.bar {
            bar.set_prefix(format!("[{}/{}]", self.done + 1, self.total));
            bar.set_message(description.to_string());
        }
    }

    fn on_step_complete(&mut self, id: &str, result: &ApplyResult) {
        self.done += 1;
        log::info!("Finished {id}: {result}");
        if self.quiet {
            return;
        }
        self.println(format!(
            "  {} {:<14} {}",
            symbol(result),
            id,
            result.to_string().dimmed()
        ));
    }

    fn on_step_failed(&mut self, id: &str, error: &anyhow::Error) {
        log::info!("Step {id} failed: {error:#}");
        if self.quiet {
            return;
        }
        self.println(format!("  {} {:<14} {}", "✗".red(), id, "failed".red()));
    }

    fn on_run_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
