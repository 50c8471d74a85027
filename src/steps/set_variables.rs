//! Copies the fields of the single input row into variables

use crate::core::error::StepError;
use crate::core::messages;
use crate::core::row::{Row, RowMeta};
use crate::core::variables::VariableSpace;
use crate::steps::{RowSink, Step, StepContext};
use serde::Deserialize;
use std::sync::Arc;

/// Scope the variables are written to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// Visible to every step of this pipeline
    #[default]
    Pipeline,
    /// The scope the pipeline was started from
    Parent,
    /// The top of the scope chain
    Root,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assignment {
    pub field: String,
    pub variable: String,

    /// Used when the field is null
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetVariablesConfig {
    #[serde(default)]
    pub assignments: Vec<Assignment>,

    #[serde(default)]
    pub scope: VariableScope,
}

#[derive(Debug)]
pub struct SetVariables {
    config: Arc<SetVariablesConfig>,
    input: RowMeta,
    indexes: Vec<usize>,
    target: Arc<VariableSpace>,
    seen_row: bool,
}

fn scope_for(scope: VariableScope, ctx: &StepContext) -> Arc<VariableSpace> {
    let pipeline = ctx.pipeline_variables();
    match scope {
        VariableScope::Pipeline => pipeline,
        VariableScope::Parent => pipeline.parent().cloned().unwrap_or(pipeline),
        VariableScope::Root => VariableSpace::root_of(&pipeline),
    }
}

impl Step for SetVariables {
    type Config = SetVariablesConfig;

    fn validate(config: &SetVariablesConfig, _ctx: &StepContext) -> Result<(), StepError> {
        if config.assignments.is_empty() {
            return Err(StepError::Config("no assignments configured".to_string()));
        }
        if let Some(empty) = config
            .assignments
            .iter()
            .find(|a| a.variable.trim().is_empty())
        {
            return Err(StepError::Config(format!(
                "field '{}' is assigned to an empty variable name",
                empty.field
            )));
        }
        Ok(())
    }

    fn init(config: &Arc<SetVariablesConfig>, ctx: &StepContext) -> Result<Self, StepError> {
        Ok(Self {
            config: Arc::clone(config),
            input: RowMeta::new(),
            indexes: Vec::new(),
            target: scope_for(config.scope, ctx),
            seen_row: false,
        })
    }

    fn bind(&mut self, input: &RowMeta, _ctx: &StepContext) -> Result<RowMeta, StepError> {
        self.indexes = self
            .config
            .assignments
            .iter()
            .map(|a| input.require_index(&a.field))
            .collect::<Result<_, _>>()?;
        self.input = input.clone();
        Ok(input.clone())
    }

    fn transform(&mut self, row: &Row, ctx: &StepContext, out: &mut RowSink) -> Result<(), StepError> {
        if self.seen_row {
            return Err(StepError::Fatal(ctx.message(messages::TOO_MANY_ROWS, &[])));
        }
        self.seen_row = true;

        for (assignment, index) in self.config.assignments.iter().zip(&self.indexes) {
            let meta = &self.input.fields()[*index];
            let value = meta
                .format_value(row.value(*index))?
                .or_else(|| assignment.default.as_deref().map(|d| ctx.substitute(d)))
                .unwrap_or_default();
            self.target.set(assignment.variable.clone(), value);
        }

        out.put(row.clone());
        Ok(())
    }
}
