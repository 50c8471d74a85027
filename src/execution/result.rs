//! Results and live progress of a pipeline run

use crate::core::state::{ExecutionStatus, StepMetrics, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Final counters of one step copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub copy: usize,
    pub status: StepStatus,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_rejected: u64,
    pub errors: u64,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counters of one step summed over its copies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepTotals {
    pub copies: usize,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_rejected: u64,
    pub errors: u64,
}

/// Outcome of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    /// Every step copy finished without errors and nobody stopped the run
    pub success: bool,
    pub stopped: bool,
    /// Errors over all step copies
    pub errors: u64,
    /// Rows rejected into error handling over all step copies
    pub error_rows: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per step copy, producers first
    pub steps: Vec<StepResult>,
}

impl PipelineResult {
    pub(crate) fn new(
        execution_id: Uuid,
        pipeline_name: impl Into<String>,
        status: ExecutionStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        steps: Vec<StepResult>,
    ) -> Self {
        Self {
            execution_id,
            pipeline_name: pipeline_name.into(),
            status,
            success: status == ExecutionStatus::Completed,
            stopped: status == ExecutionStatus::Stopped,
            errors: steps.iter().map(|s| s.errors).sum(),
            error_rows: steps.iter().map(|s| s.lines_rejected).sum(),
            started_at,
            finished_at,
            steps,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Totals of one step, `None` for unknown names
    pub fn step(&self, name: &str) -> Option<StepTotals> {
        let mut copies = self.steps.iter().filter(|s| s.step == name).peekable();
        copies.peek()?;
        Some(copies.fold(StepTotals::default(), |mut totals, copy| {
            totals.copies += 1;
            totals.lines_read += copy.lines_read;
            totals.lines_written += copy.lines_written;
            totals.lines_rejected += copy.lines_rejected;
            totals.errors += copy.errors;
            totals
        }))
    }

    /// Messages of the copies that failed
    pub fn failures(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| {
                s.error
                    .as_ref()
                    .map(|e| format!("{}.{}: {}", s.step, s.copy, e))
            })
            .collect()
    }
}

/// Counters of one step copy while the run is in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepProgress {
    pub step: String,
    pub copy: usize,
    pub status: StepStatus,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_rejected: u64,
}

/// Cheap handle to watch a running pipeline
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    units: Arc<Vec<(String, usize, Arc<StepMetrics>)>>,
}

impl ProgressHandle {
    pub(crate) fn new(units: Vec<(String, usize, Arc<StepMetrics>)>) -> Self {
        Self {
            units: Arc::new(units),
        }
    }

    pub fn snapshot(&self) -> Vec<StepProgress> {
        self.units
            .iter()
            .map(|(step, copy, metrics)| StepProgress {
                step: step.clone(),
                copy: *copy,
                status: metrics.status(),
                lines_read: metrics.lines_read(),
                lines_written: metrics.lines_written(),
                lines_rejected: metrics.lines_rejected(),
            })
            .collect()
    }

    pub fn total_units(&self) -> usize {
        self.units.len()
    }

    pub fn finished_units(&self) -> usize {
        self.units
            .iter()
            .filter(|(_, _, m)| m.status().is_finished())
            .count()
    }

    /// Rows written over all copies so far
    pub fn lines_written(&self) -> u64 {
        self.units.iter().map(|(_, _, m)| m.lines_written()).sum()
    }
}
