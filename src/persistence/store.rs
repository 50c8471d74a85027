//! SQLite-based persistence store

use crate::core::{ExecutionStatus, StepStatus};
use crate::execution::StepResult;
use crate::persistence::{ExecutionSummary, PersistenceBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SUMMARY_COLUMNS: &str =
    "id, pipeline_name, status, started_at, finished_at, errors, error_rows";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Open or create the database at `db_path`; `:memory:` keeps it in memory
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = if db_path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };

        // one connection, an in-memory database only lives on its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("rowflow");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::open(&db_dir.join("history.db")).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let path = path
            .to_str()
            .with_context(|| format!("Database path {} is not valid UTF-8", path.display()))?;
        Self::new(path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                errors INTEGER NOT NULL DEFAULT 0,
                error_rows INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS step_results (
                execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
                step TEXT NOT NULL,
                copy INTEGER NOT NULL,
                status TEXT NOT NULL,
                lines_read INTEGER NOT NULL,
                lines_written INTEGER NOT NULL,
                lines_rejected INTEGER NOT NULL,
                errors INTEGER NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                error TEXT,
                PRIMARY KEY (execution_id, step, copy)
            );

            CREATE INDEX IF NOT EXISTS idx_pipeline_name ON executions(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_started_at ON executions(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(status: &str) -> ExecutionStatus {
        match status {
            "Pending" => ExecutionStatus::Pending,
            "Running" => ExecutionStatus::Running,
            "Completed" => ExecutionStatus::Completed,
            "Stopped" => ExecutionStatus::Stopped,
            _ => ExecutionStatus::Failed,
        }
    }

    fn parse_step_status(status: &str) -> StepStatus {
        match status {
            "Created" => StepStatus::Created,
            "Initialized" => StepStatus::Initialized,
            "Running" => StepStatus::Running,
            "OutputDone" => StepStatus::OutputDone,
            "Stopped" => StepStatus::Stopped,
            "Disposed" => StepStatus::Disposed,
            _ => StepStatus::Errored,
        }
    }

    fn summary_from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        Ok(ExecutionSummary {
            execution_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: Self::from_naive(row.get("finished_at")),
            errors: row.get::<i64, _>("errors") as u64,
            error_rows: row.get::<i64, _>("error_rows") as u64,
            steps: Vec::new(),
        })
    }

    async fn load_steps(&self, execution_id: Uuid) -> Result<Vec<StepResult>> {
        let rows = sqlx::query(
            r#"
            SELECT step, copy, status, lines_read, lines_written, lines_rejected, errors, elapsed_ms, error
            FROM step_results
            WHERE execution_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load step results")?;

        Ok(rows
            .iter()
            .map(|row| StepResult {
                step: row.get("step"),
                copy: row.get::<i64, _>("copy") as usize,
                status: Self::parse_step_status(&row.get::<String, _>("status")),
                lines_read: row.get::<i64, _>("lines_read") as u64,
                lines_written: row.get::<i64, _>("lines_written") as u64,
                lines_rejected: row.get::<i64, _>("lines_rejected") as u64,
                errors: row.get::<i64, _>("errors") as u64,
                elapsed_ms: row.get::<i64, _>("elapsed_ms") as u64,
                error: row.get("error"),
            })
            .collect())
    }

    async fn with_steps(&self, rows: Vec<SqliteRow>) -> Result<Vec<ExecutionSummary>> {
        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut summary = Self::summary_from_row(row)?;
            summary.steps = self.load_steps(summary.execution_id).await?;
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let id = execution.execution_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
            (id, pipeline_name, status, started_at, finished_at, errors, error_rows)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&id)
        .bind(&execution.pipeline_name)
        .bind(format!("{:?}", execution.status))
        .bind(Self::to_naive(execution.started_at))
        .bind(Self::to_naive(execution.finished_at))
        .bind(execution.errors as i64)
        .bind(execution.error_rows as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to save execution")?;

        sqlx::query("DELETE FROM step_results WHERE execution_id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for step in &execution.steps {
            sqlx::query(
                r#"
                INSERT INTO step_results
                (execution_id, step, copy, status, lines_read, lines_written, lines_rejected, errors, elapsed_ms, error)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&id)
            .bind(&step.step)
            .bind(step.copy as i64)
            .bind(format!("{:?}", step.status))
            .bind(step.lines_read as i64)
            .bind(step.lines_written as i64)
            .bind(step.lines_rejected as i64)
            .bind(step.errors as i64)
            .bind(step.elapsed_ms as i64)
            .bind(&step.error)
            .execute(&mut *tx)
            .await
            .context("Failed to save step results")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE id = ?1",
            SUMMARY_COLUMNS
        ))
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load execution")?;

        match row {
            Some(row) => Ok(self.with_steps(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_executions(
        &self,
        pipeline_name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE pipeline_name = ?1 ORDER BY started_at DESC LIMIT ?2",
            SUMMARY_COLUMNS
        ))
        .bind(pipeline_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        self.with_steps(rows).await
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions ORDER BY started_at DESC LIMIT ?1",
            SUMMARY_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        self.with_steps(rows).await
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        let id = execution_id.to_string();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM step_results WHERE execution_id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM executions WHERE id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete execution")?;
        tx.commit().await?;

        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM executions
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}
