//! Routes rows by a condition on one field
//!
//! The literal is converted to the field's type at bind time, so `amount > 10`
//! compares numbers when `amount` is a number. Rows go to `send_true_to` or
//! `send_false_to`; when neither is set, matching rows pass to every output.

use crate::core::error::StepError;
use crate::core::row::{Row, RowMeta};
use crate::core::value::Value;
use crate::core::value_meta::ValueMeta;
use crate::steps::{RowSink, Step, StepContext};
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operator {
    #[serde(rename = "=", alias = "eq")]
    Equal,
    #[serde(rename = "<>", alias = "!=", alias = "ne")]
    NotEqual,
    #[serde(rename = "<", alias = "lt")]
    Less,
    #[serde(rename = "<=", alias = "le")]
    LessOrEqual,
    #[serde(rename = ">", alias = "gt")]
    Greater,
    #[serde(rename = ">=", alias = "ge")]
    GreaterOrEqual,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

impl Operator {
    fn needs_value(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Equal => ordering == Ordering::Equal,
            Operator::NotEqual => ordering != Ordering::Equal,
            Operator::Less => ordering == Ordering::Less,
            Operator::LessOrEqual => ordering != Ordering::Greater,
            Operator::Greater => ordering == Ordering::Greater,
            Operator::GreaterOrEqual => ordering != Ordering::Less,
            Operator::Regex | Operator::IsNull | Operator::IsNotNull => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterRowsConfig {
    pub field: String,

    pub operator: Operator,

    /// Literal compared against, in the field's string form
    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub send_true_to: Option<String>,

    #[serde(default)]
    pub send_false_to: Option<String>,
}

#[derive(Debug)]
pub struct FilterRows {
    config: Arc<FilterRowsConfig>,
    pattern: Option<Regex>,
    index: usize,
    meta: Option<ValueMeta>,
    literal: Value,
}

impl FilterRows {
    fn matches(&self, value: &Value) -> Result<bool, StepError> {
        let Some(meta) = &self.meta else {
            return Ok(false);
        };
        Ok(match self.config.operator {
            Operator::IsNull => meta.is_null(value),
            Operator::IsNotNull => !meta.is_null(value),
            Operator::Regex => match (&self.pattern, meta.format_value(value)?) {
                (Some(pattern), Some(text)) => pattern.is_match(&text),
                _ => false,
            },
            op => op.accepts(meta.compare(value, &self.literal)?),
        })
    }

    fn target(&self, matched: bool) -> Option<&str> {
        if matched {
            self.config.send_true_to.as_deref()
        } else {
            self.config.send_false_to.as_deref()
        }
    }
}

fn compile(text: &str) -> Result<Regex, StepError> {
    // the whole value has to match
    Regex::new(&format!("^(?:{})$", text))
        .map_err(|e| StepError::Config(format!("invalid regex '{}': {}", text, e)))
}

impl Step for FilterRows {
    type Config = FilterRowsConfig;

    fn validate(config: &FilterRowsConfig, ctx: &StepContext) -> Result<(), StepError> {
        if config.operator.needs_value() && config.value.is_none() {
            return Err(StepError::Config(format!(
                "operator {:?} needs a value",
                config.operator
            )));
        }
        for target in [&config.send_true_to, &config.send_false_to].into_iter().flatten() {
            if !ctx.has_target(target) {
                return Err(StepError::Config(format!(
                    "no hop leads from '{}' to '{}'",
                    ctx.step_name(),
                    target
                )));
            }
        }
        if config.operator == Operator::Regex {
            if let Some(value) = &config.value {
                compile(&ctx.substitute(value))?;
            }
        }
        Ok(())
    }

    fn init(config: &Arc<FilterRowsConfig>, ctx: &StepContext) -> Result<Self, StepError> {
        let pattern = match (&config.operator, &config.value) {
            (Operator::Regex, Some(value)) => Some(compile(&ctx.substitute(value))?),
            _ => None,
        };
        Ok(Self {
            config: Arc::clone(config),
            pattern,
            index: 0,
            meta: None,
            literal: Value::Null,
        })
    }

    fn bind(&mut self, input: &RowMeta, ctx: &StepContext) -> Result<RowMeta, StepError> {
        self.index = input.require_index(&self.config.field)?;
        let meta = input.fields()[self.index].clone();

        if self.config.operator.needs_value() && self.config.operator != Operator::Regex {
            let text = ctx.substitute(self.config.value.as_deref().unwrap_or_default());
            self.literal = meta.parse_value(&text).map_err(|e| {
                StepError::Config(format!("value for field '{}': {}", meta.name, e))
            })?;
        }
        self.meta = Some(meta);
        Ok(input.clone())
    }

    fn transform(&mut self, row: &Row, _ctx: &StepContext, out: &mut RowSink) -> Result<(), StepError> {
        let matched = self.matches(row.value(self.index))?;
        let routed = self.config.send_true_to.is_some() || self.config.send_false_to.is_some();

        match self.target(matched) {
            Some(target) => out.put_to(target, row.clone()),
            None if !routed && matched => out.put(row.clone()),
            None => {}
        }
        Ok(())
    }
}
