//! CLI output formatting

use crate::core::{ExecutionStatus, StepStatus};
use crate::execution::{ExecutionEvent, ProgressHandle, StepResult};
use crate::persistence::ExecutionSummary;
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
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "# ");

/// Spinner shown while a pipeline runs
pub fn create_spinner() -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// One line describing a running pipeline
pub fn format_progress(progress: &ProgressHandle) -> String {
    format!(
        "{}/{} step copies finished, {} rows written",
        progress.finished_units(),
        progress.total_units(),
        progress.lines_written()
    )
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Stopped => style("STOPPED").yellow().to_string(),
    }
}

/// Format a step copy status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::OutputDone => style("DONE").green().to_string(),
        StepStatus::Errored => style("ERRORED").red().to_string(),
        StepStatus::Stopped => style("STOPPED").yellow().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        other => style(format!("{:?}", other).to_uppercase()).dim().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Stopped => STOP,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} - {} - {} errors, {} error rows",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        summary.errors,
        summary.error_rows
    )
}

/// Per copy counters as aligned lines
pub fn format_step_results(steps: &[StepResult]) -> Vec<String> {
    let width = steps
        .iter()
        .map(|s| s.step.len() + 1 + s.copy.to_string().len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut lines = vec![format!(
        "{:<width$}  {:>10} {:>10} {:>10} {:>6} {:>9}  {}",
        "STEP", "READ", "WRITTEN", "REJECTED", "ERRORS", "TIME", "STATUS"
    )];
    for step in steps {
        lines.push(format!(
            "{:<width$}  {:>10} {:>10} {:>10} {:>6} {:>9}  {}",
            format!("{}.{}", step.step, step.copy),
            step.lines_read,
            step.lines_written,
            step.lines_rejected,
            step.errors,
            format_duration(Duration::from_millis(step.elapsed_ms)),
            format_step_status(step.status)
        ));
    }
    lines
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::StepStarted { step, copy } => {
            format!("{} {}.{}", SPINNER, style(step).cyan(), copy)
        }
        ExecutionEvent::StepFinished {
            step,
            copy,
            status,
            lines_read,
            lines_written,
            lines_rejected,
        } => {
            let icon = match status {
                StepStatus::OutputDone => CHECK,
                StepStatus::Errored => CROSS,
                _ => STOP,
            };
            format!(
                "{} {}.{} {}",
                icon,
                style(step).green(),
                copy,
                style(format!(
                    "(I={}, O={}, R={})",
                    lines_read, lines_written, lines_rejected
                ))
                .dim()
            )
        }
        ExecutionEvent::StepFailed { step, copy, error } => format!(
            "{} {}.{}: {}",
            CROSS,
            style(step).red(),
            copy,
            style(error).dim()
        ),
        ExecutionEvent::PipelineFinished {
            execution_id,
            status,
        } => format!(
            "{} Pipeline ({}) {}",
            INFO,
            style(short_id(execution_id)).dim(),
            format_status(*status)
        ),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}.{:03}s", secs, millis % 1000)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
