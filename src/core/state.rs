//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every step finished without errors
    Completed,
    /// At least one step failed
    Failed,
    /// The run was stopped from outside
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

/// Lifecycle of one step copy
///
/// ```text
/// Created -> Initialized -> Running -> OutputDone | Stopped | Errored -> Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepStatus {
    Created = 0,
    Initialized = 1,
    Running = 2,
    /// All input consumed and all output flushed
    OutputDone = 3,
    Stopped = 4,
    Errored = 5,
    Disposed = 6,
}

impl StepStatus {
    /// Whether the step stopped processing rows
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            StepStatus::OutputDone | StepStatus::Stopped | StepStatus::Errored | StepStatus::Disposed
        )
    }

    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Created, Initialized)
                | (Created, Errored)
                | (Initialized, Running)
                | (Initialized, Stopped)
                | (Initialized, Errored)
                | (Running, OutputDone)
                | (Running, Stopped)
                | (Running, Errored)
                | (Created, Disposed)
                | (Initialized, Disposed)
                | (OutputDone, Disposed)
                | (Stopped, Disposed)
                | (Errored, Disposed)
        )
    }

    fn from_u8(value: u8) -> StepStatus {
        match value {
            0 => StepStatus::Created,
            1 => StepStatus::Initialized,
            2 => StepStatus::Running,
            3 => StepStatus::OutputDone,
            4 => StepStatus::Stopped,
            5 => StepStatus::Errored,
            _ => StepStatus::Disposed,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StepStatus::Created => "created",
            StepStatus::Initialized => "initialized",
            StepStatus::Running => "running",
            StepStatus::OutputDone => "finished",
            StepStatus::Stopped => "stopped",
            StepStatus::Errored => "errored",
            StepStatus::Disposed => "disposed",
        };
        f.write_str(label)
    }
}

/// Live counters of one step copy
///
/// Written only by the thread that runs the copy, read by anyone who
/// wants to watch progress.
#[derive(Debug)]
pub struct StepMetrics {
    status: AtomicU8,
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_rejected: AtomicU64,
    errors: AtomicU64,
    elapsed_micros: AtomicU64,
}

impl StepMetrics {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(StepStatus::Created as u8),
            lines_read: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            elapsed_micros: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> StepStatus {
        StepStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: StepStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    pub fn lines_rejected(&self) -> u64 {
        self.lines_rejected.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.elapsed_micros.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_read(&self) -> u64 {
        self.lines_read.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn increment_written(&self) {
        self.lines_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_rejected(&self) -> u64 {
        self.lines_rejected.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_elapsed_micros(&self, micros: u64) {
        self.elapsed_micros.store(micros, Ordering::Relaxed);
    }
}

impl Default for StepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of step copies
    pub total_units: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_units: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_units: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_units = total_units;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.finish(ExecutionStatus::Completed);
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self) {
        self.finish(ExecutionStatus::Failed);
    }

    /// Mark pipeline as stopped
    pub fn stop(&mut self) {
        self.finish(ExecutionStatus::Stopped);
    }

    fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        if self.started_at.is_none() {
            self.started_at = self.completed_at;
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
