//! Source step producing a number of identical rows
//!
//! ```yaml
//! - name: generate
//!   type: row_generator
//!   config:
//!     limit: "${ROWS}"
//!     fields:
//!       - name: amount
//!         type: number
//!         format: "#,##0.00"
//!         value: "1,234.50"
//! ```

use crate::core::error::StepError;
use crate::core::row::{Row, RowMeta};
use crate::core::value::{Value, ValueType};
use crate::core::value_meta::ValueMeta;
use crate::steps::{Generate, RowSink, Step, StepContext};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Number of rows to produce, either literal or with variables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RowLimit {
    Count(u64),
    Expression(String),
}

impl Default for RowLimit {
    fn default() -> Self {
        RowLimit::Count(10)
    }
}

impl RowLimit {
    pub fn resolve(&self, ctx: &StepContext) -> Result<u64, StepError> {
        match self {
            RowLimit::Count(count) => Ok(*count),
            RowLimit::Expression(text) => {
                let resolved = ctx.substitute(text);
                resolved.trim().parse().map_err(|_| {
                    StepError::Config(format!("limit '{}' is not a row count", resolved))
                })
            }
        }
    }
}

fn default_field_type() -> ValueType {
    ValueType::String
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorField {
    pub name: String,

    #[serde(rename = "type", default = "default_field_type")]
    pub value_type: ValueType,

    #[serde(default, alias = "mask")]
    pub format: Option<String>,

    #[serde(default)]
    pub length: Option<u32>,

    #[serde(default)]
    pub precision: Option<u32>,

    /// Literal in the field's string form; missing means null
    #[serde(default)]
    pub value: Option<serde_yaml::Value>,
}

impl GeneratorField {
    fn value_meta(&self, origin: &str) -> ValueMeta {
        let mut meta = ValueMeta::new(self.name.clone(), self.value_type).with_origin(origin);
        meta.conversion_mask = self.format.clone();
        meta.length = self.length;
        meta.precision = self.precision;
        meta
    }

    fn literal(&self) -> Option<String> {
        match self.value.as_ref()? {
            serde_yaml::Value::Null => None,
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            other => serde_yaml::to_string(other)
                .ok()
                .map(|s| s.trim_end().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowGeneratorConfig {
    #[serde(default)]
    pub limit: RowLimit,

    #[serde(default)]
    pub fields: Vec<GeneratorField>,
}

#[derive(Debug)]
pub struct RowGenerator {
    config: Arc<RowGeneratorConfig>,
    limit: u64,
    produced: u64,
    row: Row,
}

impl Step for RowGenerator {
    type Config = RowGeneratorConfig;

    fn validate(config: &RowGeneratorConfig, ctx: &StepContext) -> Result<(), StepError> {
        config.limit.resolve(ctx)?;
        let mut names = HashSet::new();
        for field in &config.fields {
            if field.name.trim().is_empty() {
                return Err(StepError::Config("field names must not be empty".to_string()));
            }
            if !names.insert(field.name.as_str()) {
                return Err(StepError::Config(format!("duplicate field '{}'", field.name)));
            }
        }
        Ok(())
    }

    fn init(config: &Arc<RowGeneratorConfig>, ctx: &StepContext) -> Result<Self, StepError> {
        Ok(Self {
            config: Arc::clone(config),
            limit: config.limit.resolve(ctx)?,
            produced: 0,
            row: Row::empty(),
        })
    }

    fn bind(&mut self, _input: &RowMeta, ctx: &StepContext) -> Result<RowMeta, StepError> {
        let mut meta = RowMeta::new();
        let mut values = Vec::with_capacity(self.config.fields.len());

        for field in &self.config.fields {
            let value_meta = field.value_meta(ctx.step_name());
            let value = match field.literal() {
                Some(text) => value_meta.parse_value(&ctx.substitute(&text)).map_err(|e| {
                    StepError::Config(format!("value of field '{}': {}", field.name, e))
                })?,
                None => Value::Null,
            };
            meta.add(value_meta);
            values.push(value);
        }

        self.row = Row::new(values);
        Ok(meta)
    }

    fn generate(&mut self, _ctx: &StepContext, out: &mut RowSink) -> Result<Generate, StepError> {
        if self.produced >= self.limit {
            return Ok(Generate::Done);
        }
        out.put(self.row.clone());
        self.produced += 1;
        Ok(if self.produced >= self.limit {
            Generate::Done
        } else {
            Generate::More
        })
    }
}
