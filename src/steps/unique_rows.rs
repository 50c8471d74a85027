//! Removes adjacent duplicate rows
//!
//! Only consecutive rows are compared, so the input should be sorted on the
//! compare fields. The first row of every group is emitted when the next
//! group starts, the final group at end of stream.

use crate::core::error::{RowError, StepError};
use crate::core::messages;
use crate::core::row::{Row, RowMeta};
use crate::core::value::{Value, ValueType};
use crate::core::value_meta::ValueMeta;
use crate::steps::{RowSink, Step, StepContext};
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::Arc;

pub const DUPLICATE_ROW_CODE: &str = "UNQ001";

#[derive(Debug, Clone, Deserialize)]
pub struct CompareField {
    pub name: String,

    #[serde(default)]
    pub case_insensitive: bool,
}

fn default_count_field() -> String {
    "count".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniqueRowsConfig {
    /// Fields that make up the key; all fields when empty
    #[serde(default)]
    pub compare_fields: Vec<CompareField>,

    /// Append the group size to the emitted row
    #[serde(default)]
    pub count_rows: bool,

    #[serde(default = "default_count_field")]
    pub count_field: String,

    /// Send duplicates to error handling instead of dropping them
    #[serde(default)]
    pub reject_duplicates: bool,
}

impl Default for UniqueRowsConfig {
    fn default() -> Self {
        Self {
            compare_fields: Vec::new(),
            count_rows: false,
            count_field: default_count_field(),
            reject_duplicates: false,
        }
    }
}

#[derive(Debug)]
pub struct UniqueRows {
    config: Arc<UniqueRowsConfig>,
    input: RowMeta,
    keys: Vec<(usize, ValueMeta)>,
    previous: Option<Row>,
    count: i64,
}

impl UniqueRows {
    fn same_key(&self, a: &Row, b: &Row) -> Result<bool, StepError> {
        for (index, meta) in &self.keys {
            if meta.compare(a.value(*index), b.value(*index))? != Ordering::Equal {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn group_row(&self, row: Row) -> Row {
        if self.config.count_rows {
            row.extended([Value::Integer(self.count)])
        } else {
            row
        }
    }
}

impl Step for UniqueRows {
    type Config = UniqueRowsConfig;

    fn validate(config: &UniqueRowsConfig, ctx: &StepContext) -> Result<(), StepError> {
        if config.count_rows && config.count_field.trim().is_empty() {
            return Err(StepError::Config("count_field must not be empty".to_string()));
        }
        if config.count_rows && config.reject_duplicates {
            return Err(StepError::Config(
                "count_rows and reject_duplicates can't be combined".to_string(),
            ));
        }
        if config.reject_duplicates && !ctx.handles_errors() {
            return Err(StepError::Config(
                "reject_duplicates needs error handling on the step".to_string(),
            ));
        }
        Ok(())
    }

    fn init(config: &Arc<UniqueRowsConfig>, _ctx: &StepContext) -> Result<Self, StepError> {
        Ok(Self {
            config: Arc::clone(config),
            input: RowMeta::new(),
            keys: Vec::new(),
            previous: None,
            count: 0,
        })
    }

    fn bind(&mut self, input: &RowMeta, ctx: &StepContext) -> Result<RowMeta, StepError> {
        self.keys = if self.config.compare_fields.is_empty() {
            input.fields().iter().cloned().enumerate().collect()
        } else {
            self.config
                .compare_fields
                .iter()
                .map(|field| {
                    let index = input.require_index(&field.name)?;
                    let mut meta = input.fields()[index].clone();
                    meta.case_insensitive |= field.case_insensitive;
                    Ok((index, meta))
                })
                .collect::<Result<_, StepError>>()?
        };
        self.input = input.clone();

        let mut output = input.clone();
        if self.config.count_rows {
            output.add(
                ValueMeta::new(self.config.count_field.clone(), ValueType::Integer)
                    .with_origin(ctx.step_name()),
            );
        }
        Ok(output)
    }

    fn transform(&mut self, row: &Row, ctx: &StepContext, out: &mut RowSink) -> Result<(), StepError> {
        let duplicate = match &self.previous {
            Some(previous) => self.same_key(previous, row)?,
            None => {
                self.previous = Some(row.clone());
                self.count = 1;
                return Ok(());
            }
        };

        if duplicate {
            if self.config.reject_duplicates {
                let description =
                    ctx.message(messages::DUPLICATE_ROW, &[&self.input.describe_row(row)]);
                let mut error = RowError::new(DUPLICATE_ROW_CODE, description);
                for (index, _) in &self.keys {
                    if let Some(field) = self.input.field(*index) {
                        error = error.with_field(field.name.clone());
                    }
                }
                return Err(StepError::Row(error));
            }
            self.count += 1;
            return Ok(());
        }

        if let Some(finished) = self.previous.replace(row.clone()) {
            out.put(self.group_row(finished));
        }
        self.count = 1;
        Ok(())
    }

    fn flush(&mut self, _ctx: &StepContext, out: &mut RowSink) -> Result<(), StepError> {
        if let Some(last) = self.previous.take() {
            out.put(self.group_row(last));
        }
        Ok(())
    }
}
