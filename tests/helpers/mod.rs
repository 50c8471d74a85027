//! Test utilities: extra step types, a collecting row listener and run helpers

#![allow(dead_code)]

use rowflow::core::{Row, RowError, RowMeta, StepError, StepMeta, ValueMeta, ValueType};
use rowflow::execution::{ExecutionEngine, PipelineResult, RowListener, RowSet};
use rowflow::core::{PipelineMeta, Value, VariableSpace};
use rowflow::steps::{Generate, RowSink, Step, StepContext, StepRegistry};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Field definition of a [`StaticRows`] source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRowsConfig {
    pub fields: Vec<FieldDef>,
    /// Values in their string form
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

/// Source emitting a fixed list of rows
pub struct StaticRows {
    config: Arc<StaticRowsConfig>,
    rows: Vec<Row>,
    next: usize,
}

impl Step for StaticRows {
    type Config = StaticRowsConfig;

    fn init(config: &Arc<StaticRowsConfig>, _ctx: &StepContext) -> Result<Self, StepError> {
        Ok(Self {
            config: Arc::clone(config),
            rows: Vec::new(),
            next: 0,
        })
    }

    fn bind(&mut self, _input: &RowMeta, ctx: &StepContext) -> Result<RowMeta, StepError> {
        let meta = RowMeta::from_fields(
            self.config
                .fields
                .iter()
                .map(|f| ValueMeta::new(f.name.clone(), f.value_type).with_origin(ctx.step_name()))
                .collect(),
        );
        let mut rows = Vec::with_capacity(self.config.rows.len());
        for texts in &self.config.rows {
            let mut values = Vec::with_capacity(texts.len());
            for (text, field) in texts.iter().zip(meta.fields()) {
                values.push(field.parse_value(text)?);
            }
            rows.push(Row::new(values));
        }
        self.rows = rows;
        Ok(meta)
    }

    fn generate(&mut self, _ctx: &StepContext, out: &mut RowSink) -> Result<Generate, StepError> {
        match self.rows.get(self.next) {
            Some(row) => {
                out.put(row.clone());
                self.next += 1;
                Ok(Generate::More)
            }
            None => Ok(Generate::Done),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailOnRowConfig {
    /// 1-based positions of the rows that fail
    pub rows: Vec<u64>,
    /// Fail with a row error instead of a fatal one
    #[serde(default)]
    pub recoverable: bool,
    /// Panic instead of returning an error
    #[serde(default)]
    pub panic: bool,
}

/// Pass-through that fails on chosen rows
pub struct FailOnRow {
    config: Arc<FailOnRowConfig>,
    seen: u64,
}

impl Step for FailOnRow {
    type Config = FailOnRowConfig;

    fn init(config: &Arc<FailOnRowConfig>, _ctx: &StepContext) -> Result<Self, StepError> {
        Ok(Self {
            config: Arc::clone(config),
            seen: 0,
        })
    }

    fn bind(&mut self, input: &RowMeta, _ctx: &StepContext) -> Result<RowMeta, StepError> {
        Ok(input.clone())
    }

    fn transform(&mut self, row: &Row, _ctx: &StepContext, out: &mut RowSink) -> Result<(), StepError> {
        self.seen += 1;
        if !self.config.rows.contains(&self.seen) {
            out.put(row.clone());
            return Ok(());
        }
        if self.config.panic {
            panic!("exploded on row {}", self.seen);
        }
        if self.config.recoverable {
            Err(StepError::Row(
                RowError::new("FAIL001", format!("row {} refused", self.seen)).with_field("id"),
            ))
        } else {
            Err(StepError::Fatal(format!("failed on row {}", self.seen)))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoConfig {}

/// Step whose initialization always fails
pub struct FailingInit;

impl Step for FailingInit {
    type Config = NoConfig;

    fn init(_config: &Arc<NoConfig>, _ctx: &StepContext) -> Result<Self, StepError> {
        Err(StepError::Config("cannot reach the database".to_string()))
    }

    fn bind(&mut self, input: &RowMeta, _ctx: &StepContext) -> Result<RowMeta, StepError> {
        Ok(input.clone())
    }
}

/// Records every row a step reads, writes and rejects
#[derive(Default)]
pub struct CollectingListener {
    read: Mutex<Vec<Row>>,
    written: Mutex<Vec<Row>>,
    errors: Mutex<Vec<(RowMeta, Row)>>,
}

impl CollectingListener {
    pub fn read(&self) -> Vec<Row> {
        self.read.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<Row> {
        self.written.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(RowMeta, Row)> {
        self.errors.lock().unwrap().clone()
    }
}

impl RowListener for CollectingListener {
    fn row_read(&self, _meta: &RowMeta, row: &Row) {
        self.read.lock().unwrap().push(row.clone());
    }

    fn row_written(&self, _meta: &RowMeta, row: &Row) {
        self.written.lock().unwrap().push(row.clone());
    }

    fn error_row_written(&self, meta: &RowMeta, row: &Row) {
        self.errors.lock().unwrap().push((meta.clone(), row.clone()));
    }
}

/// Built-in steps plus the test steps above
pub fn registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry
        .register::<StaticRows>("static_rows")
        .register::<FailOnRow>("fail_on_row")
        .register::<FailingInit>("failing_init");
    registry
}

/// An engine isolated from the process environment
pub fn engine() -> ExecutionEngine {
    ExecutionEngine::new(registry()).with_parent_variables(VariableSpace::root())
}

pub fn static_rows(name: &str, fields: &[(&str, ValueType)], rows: &[&[&str]]) -> StepMeta {
    let config = StaticRowsConfig {
        fields: fields
            .iter()
            .map(|(name, value_type)| FieldDef {
                name: name.to_string(),
                value_type: *value_type,
            })
            .collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect(),
    };
    StepMeta::new(name, "static_rows").with_config(serde_yaml::to_value(config).unwrap())
}

/// Source of `count` rows with an integer `id` running from 1
pub fn numbered_rows(name: &str, count: usize) -> StepMeta {
    let ids: Vec<String> = (1..=count).map(|i| i.to_string()).collect();
    let rows: Vec<Vec<&str>> = ids.iter().map(|id| vec![id.as_str()]).collect();
    let rows: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
    static_rows(name, &[("id", ValueType::Integer)], &rows)
}

pub fn fail_on_row(name: &str, config: FailOnRowConfig) -> StepMeta {
    StepMeta::new(name, "fail_on_row").with_config(serde_yaml::to_value(config).unwrap())
}

pub fn yaml_step(name: &str, step_type: &str, yaml: &str) -> StepMeta {
    StepMeta::new(name, step_type).with_yaml_config(yaml).unwrap()
}

/// What a run left behind
pub struct Observed {
    pub result: PipelineResult,
    pub listener: Arc<CollectingListener>,
    pub row_sets: Vec<Arc<RowSet>>,
    pub variables: Arc<VariableSpace>,
}

/// Runs `pipeline` with a [`CollectingListener`] on `step`
pub fn run_observed(pipeline: &PipelineMeta, step: &str) -> Observed {
    let mut execution = engine().prepare(pipeline).unwrap();
    let listener = Arc::new(CollectingListener::default());
    execution
        .add_row_listener(step, Arc::clone(&listener) as Arc<dyn RowListener>)
        .unwrap();
    let row_sets = execution.row_sets().to_vec();
    let variables = Arc::clone(execution.variables());
    let result = execution.wait_until_finished();
    Observed {
        result,
        listener,
        row_sets,
        variables,
    }
}

pub fn run(pipeline: &PipelineMeta) -> PipelineResult {
    engine().execute(pipeline).unwrap()
}

/// Read, written and rejected rows of a step over all copies
pub fn assert_totals(result: &PipelineResult, step: &str, read: u64, written: u64, rejected: u64) {
    let totals = result
        .step(step)
        .unwrap_or_else(|| panic!("no results for step {step}"));
    assert_eq!(
        (totals.lines_read, totals.lines_written, totals.lines_rejected),
        (read, written, rejected),
        "counters of {step} (read, written, rejected)"
    );
}

/// Values of one column
pub fn column(rows: &[Row], index: usize) -> Vec<Value> {
    rows.iter().map(|row| row.value(index).clone()).collect()
}

/// Rows read per copy of `step`, ordered by copy
pub fn reads_per_copy(result: &PipelineResult, step: &str) -> Vec<u64> {
    let mut copies: Vec<_> = result.steps.iter().filter(|s| s.step == step).collect();
    copies.sort_by_key(|s| s.copy);
    copies.iter().map(|s| s.lines_read).collect()
}
