//! Selects, renames, retypes and removes fields
//!
//! With `fields` set, the output holds exactly those fields in that order.
//! Otherwise every input field is kept except the ones named in `remove`.

use crate::core::error::{RowError, StepError};
use crate::core::messages;
use crate::core::row::{Row, RowMeta};
use crate::core::value::ValueType;
use crate::core::value_meta::ValueMeta;
use crate::steps::{RowSink, Step, StepContext};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

pub const CONVERSION_FAILED_CODE: &str = "SEL001";

#[derive(Debug, Clone, Deserialize)]
pub struct SelectField {
    pub name: String,

    #[serde(default)]
    pub rename: Option<String>,

    /// New type; the value is converted from the input type
    #[serde(rename = "type", default)]
    pub value_type: Option<ValueType>,

    /// Mask of the output field
    #[serde(default, alias = "mask")]
    pub format: Option<String>,

    #[serde(default)]
    pub length: Option<u32>,

    #[serde(default)]
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectValuesConfig {
    #[serde(default)]
    pub fields: Vec<SelectField>,

    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug)]
struct Column {
    index: usize,
    source: ValueMeta,
    target: ValueMeta,
    convert: bool,
}

#[derive(Debug)]
pub struct SelectValues {
    config: Arc<SelectValuesConfig>,
    columns: Vec<Column>,
}

impl SelectValues {
    fn column(index: usize, source: &ValueMeta, field: &SelectField, origin: &str) -> Column {
        let mut target = source.renamed(field.rename.clone().unwrap_or_else(|| field.name.clone()));
        if field.value_type.is_some() || field.format.is_some() {
            let value_type = field.value_type.unwrap_or(source.value_type);
            let mask = field.format.clone().or_else(|| source.conversion_mask.clone());
            target = target.retyped(value_type, mask);
        }
        if field.length.is_some() {
            target.length = field.length;
        }
        if field.precision.is_some() {
            target.precision = field.precision;
        }
        let convert = target.value_type != source.value_type || field.format.is_some();
        if convert {
            target.origin = Some(origin.to_string());
        }
        Column {
            index,
            source: source.clone(),
            target,
            convert,
        }
    }
}

impl Step for SelectValues {
    type Config = SelectValuesConfig;

    fn validate(config: &SelectValuesConfig, _ctx: &StepContext) -> Result<(), StepError> {
        if !config.fields.is_empty() && !config.remove.is_empty() {
            return Err(StepError::Config(
                "use either fields or remove, not both".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for field in &config.fields {
            let output = field.rename.as_deref().unwrap_or(&field.name);
            if !names.insert(output) {
                return Err(StepError::Config(format!(
                    "field '{}' is selected twice",
                    output
                )));
            }
        }
        Ok(())
    }

    fn init(config: &Arc<SelectValuesConfig>, _ctx: &StepContext) -> Result<Self, StepError> {
        Ok(Self {
            config: Arc::clone(config),
            columns: Vec::new(),
        })
    }

    fn bind(&mut self, input: &RowMeta, ctx: &StepContext) -> Result<RowMeta, StepError> {
        let mut columns = Vec::new();

        if self.config.fields.is_empty() {
            let removed = self
                .config
                .remove
                .iter()
                .map(|name| input.require_index(name))
                .collect::<Result<HashSet<usize>, StepError>>()?;
            for (index, meta) in input.fields().iter().enumerate() {
                if !removed.contains(&index) {
                    columns.push(Column {
                        index,
                        source: meta.clone(),
                        target: meta.clone(),
                        convert: false,
                    });
                }
            }
        } else {
            for field in &self.config.fields {
                let index = input.require_index(&field.name)?;
                columns.push(Self::column(
                    index,
                    &input.fields()[index],
                    field,
                    ctx.step_name(),
                ));
            }
        }

        let output = RowMeta::from_fields(columns.iter().map(|c| c.target.clone()).collect());
        self.columns = columns;
        Ok(output)
    }

    fn transform(&mut self, row: &Row, ctx: &StepContext, out: &mut RowSink) -> Result<(), StepError> {
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = row.value(column.index);
            if !column.convert {
                values.push(value.clone());
                continue;
            }
            let converted = column.target.convert_from(&column.source, value).map_err(|e| {
                let description =
                    ctx.message(messages::CONVERSION_FAILED, &[&column.source.name, &e]);
                StepError::Row(
                    RowError::new(CONVERSION_FAILED_CODE, description)
                        .with_field(column.source.name.clone()),
                )
            })?;
            values.push(converted);
        }
        out.put(Row::new(values));
        Ok(())
    }
}
