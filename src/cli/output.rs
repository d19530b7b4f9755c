//! CLI output formatting

use crate::{
    core::{ExecutionStatus, FailureKind, PipelineState, StepEntry},
    execution::ExecutionEvent,
    registry::Revision,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "* ");

/// Create a progress bar with one tick per step
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::CompletedWithFailures => {
            style("COMPLETED WITH FAILURES").red().to_string()
        }
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Step => "step failed",
        FailureKind::Timeout => "timed out",
        FailureKind::Panicked => "panicked",
        FailureKind::Cancelled => "cancelled",
        FailureKind::ConfigurationNotFound => "no configuration",
        FailureKind::Persistence => "store error",
        FailureKind::CorrectionFailed => "correction failed",
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted { run_id, steps } => format!(
            "{} Starting run {} ({} steps)",
            ROCKET,
            style(&run_id.to_string()[..8]).dim(),
            style(steps.len()).cyan()
        ),
        ExecutionEvent::StepStarted {
            step_id,
            attempt,
            max_attempts,
        } => {
            if *attempt > 1 {
                format!(
                    "{} {} (attempt {}/{})",
                    SPINNER,
                    style(step_id).cyan(),
                    style(attempt).dim(),
                    style(max_attempts).dim()
                )
            } else {
                format!("{} {}", SPINNER, style(step_id).cyan())
            }
        }
        ExecutionEvent::StepAttemptFailed {
            step_id,
            attempt,
            kind,
            error,
        } => format!(
            "{} {} attempt {} {}: {}",
            WARN,
            style(step_id).cyan(),
            attempt,
            kind_label(*kind),
            style(first_line(error)).dim()
        ),
        ExecutionEvent::StepCorrected { step_id, version } => format!(
            "{} {} prompt revised to {}",
            WRENCH,
            style(step_id).cyan(),
            style(format!("v{}", version)).bold()
        ),
        ExecutionEvent::StepSucceeded { step_id, attempts } => {
            if *attempts > 1 {
                format!(
                    "{} {} succeeded after {} attempts",
                    CHECK,
                    style(step_id).green(),
                    attempts
                )
            } else {
                format!("{} {}", CHECK, style(step_id).green())
            }
        }
        ExecutionEvent::StepExhausted {
            step_id,
            attempts,
            kind,
            error,
        } => format!(
            "{} {} gave up after {} attempt(s), {}: {}",
            CROSS,
            style(step_id).red(),
            attempts,
            kind_label(*kind),
            style(first_line(error)).red()
        ),
        ExecutionEvent::PipelineCompleted { run_id, status } => format!(
            "{} Run {} {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    }
}

/// One line per step of a finished run
pub fn format_state_summary(state: &PipelineState) -> String {
    let mut lines = Vec::new();
    for (step_id, entry) in state.entries() {
        let line = match entry {
            StepEntry::Succeeded {
                attempts,
                revisions,
                ..
            } => format!(
                "  {} {} ({} attempt(s), {} revision(s))",
                CHECK,
                style(step_id).bold(),
                attempts,
                revisions
            ),
            StepEntry::Failed(marker) => format!(
                "  {} {} ({}, {} attempt(s)): {}",
                CROSS,
                style(step_id).bold(),
                kind_label(marker.kind),
                marker.attempts,
                style(first_line(&marker.error)).red()
            ),
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Format one registry entry
pub fn format_revision(revision: &Revision) -> String {
    let mut line = format!(
        "{} {} {} {}",
        style(revision.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(&revision.step_id).cyan(),
        style(revision.label()).bold(),
        revision.origin
    );
    if let Some(score) = revision.score {
        line.push_str(&format!(" score={:.3}", score));
    }
    if let Some(ref error) = revision.error {
        line.push_str(&format!(" {}", style(first_line(error)).dim()));
    }
    line
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
