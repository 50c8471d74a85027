//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::execution::{PipelineResult, StepResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Final status
    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Errors over all step copies
    pub errors: u64,

    /// Rows sent to error handling
    pub error_rows: u64,

    /// Per step copy counters
    pub steps: Vec<StepResult>,
}

impl ExecutionSummary {
    /// Create a summary from a run result
    pub fn from_result(result: &PipelineResult) -> Self {
        Self {
            execution_id: result.execution_id,
            pipeline_name: result.pipeline_name.clone(),
            status: result.status,
            started_at: result.started_at,
            finished_at: result.finished_at,
            errors: result.errors,
            error_rows: result.error_rows,
            steps: result.steps.clone(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Rows written, summed over every step copy
    pub fn lines_written(&self) -> u64 {
        self.steps.iter().map(|s| s.lines_written).sum()
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run, replacing an earlier save of the same execution
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// Runs of a pipeline, newest first
    async fn list_executions(
        &self,
        pipeline_name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>>;

    /// Runs of every pipeline, newest first
    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>>;

    /// Remove a run
    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// Names of every pipeline with at least one run
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }

    fn newest_first<'a>(
        executions: impl Iterator<Item = &'a ExecutionSummary>,
        limit: usize,
    ) -> Vec<ExecutionSummary> {
        let mut result: Vec<ExecutionSummary> = executions.cloned().collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        result
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        Ok(self.executions.read().await.get(&execution_id).cloned())
    }

    async fn list_executions(
        &self,
        pipeline_name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(Self::newest_first(
            execs.values().filter(|e| e.pipeline_name == pipeline_name),
            limit,
        ))
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(Self::newest_first(execs.values(), limit))
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        self.executions.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
