//! Terminal rendering of progress events for `autoscad run`.

use std::time::Duration;

use autoscad::events::{ProgressEvent, ProgressSink};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Prints one line per milestone and keeps a spinner for the current phase.
///
/// The spinner draws to stderr and hides itself when stderr is not a terminal.
pub struct ConsoleSink {
    spinner: ProgressBar,
    quiet: bool,
}

impl ConsoleSink {
    pub fn new(quiet: bool) -> Self {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { spinner, quiet }
    }

    fn line(&self, text: String) {
        if self.quiet {
            return;
        }
        if self.spinner.is_hidden() {
            eprintln!("{}", text);
        } else {
            self.spinner.println(text);
        }
    }

    /// Remove the spinner once the run has ended.
    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::IterationStarted {
                iteration,
                max_iterations,
            } => {
                self.line(format!(
                    "{} Iteration {}/{}",
                    "→".cyan(),
                    iteration,
                    max_iterations
                ));
                self.spinner.set_message("rendering");
            }
            ProgressEvent::RenderAttemptFailed {
                attempt,
                max_attempts,
                diagnostic,
                ..
            } => {
                let first = diagnostic.lines().nth(1).unwrap_or(diagnostic.as_str());
                self.line(format!(
                    "   {} render failed (attempt {}/{}): {}",
                    "✗".red(),
                    attempt,
                    max_attempts,
                    first.trim()
                ));
                self.spinner.set_message("repairing");
            }
            ProgressEvent::Rendered {
                views,
                repaired,
                final_pass,
                ..
            } => {
                let label = if *final_pass { "final render" } else { "rendered" };
                let suffix = if *repaired { " (after repair)" } else { "" };
                self.line(format!(
                    "   {} {} {}{}",
                    "✓".green(),
                    label,
                    views.join(", "),
                    suffix
                ));
                self.spinner.set_message("evaluating");
            }
            ProgressEvent::Evaluated {
                fulfilled,
                explanation,
                ..
            } => {
                let verdict = if *fulfilled {
                    "YES".green().bold()
                } else {
                    "NO".yellow().bold()
                };
                self.line(format!("   {} {}", verdict, explanation));
                self.spinner.set_message("planning");
            }
            ProgressEvent::Planned { plan, .. } => {
                let steps = plan.as_array().map_or(1, Vec::len);
                self.line(format!("   {} plan with {} step(s)", "✓".green(), steps));
                self.spinner.set_message("generating code");
            }
            ProgressEvent::CodeGenerated { source, digest, .. } => {
                self.line(format!(
                    "   {} generated {} lines [{}]",
                    "✓".green(),
                    source.lines().count(),
                    digest.dimmed()
                ));
            }
            ProgressEvent::Fulfilled { iterations_run } => {
                self.line(format!(
                    "{} Specification fulfilled after {} iteration(s)",
                    "OK".green().bold(),
                    iterations_run
                ));
            }
            ProgressEvent::IterationExhausted {
                iterations_run,
                explanation,
            } => {
                self.line(format!(
                    "{} Stopped after {} iteration(s): {}",
                    "Warning:".yellow().bold(),
                    iterations_run,
                    explanation
                ));
            }
            ProgressEvent::Aborted { reason, detail, .. } => {
                self.line(format!("{} {}: {}", "Aborted:".red().bold(), reason, detail));
            }
        }
        if event.is_terminal() {
            self.finish();
        }
    }
}
