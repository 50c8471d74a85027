//! Step domain model

use crate::core::error::RowError;
use crate::core::row::RowMeta;
use crate::core::value::{Value, ValueType};
use crate::core::value_meta::ValueMeta;
use serde::{Deserialize, Serialize};

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct StepMeta {
    /// Unique step name
    pub name: String,

    /// Registered type identifier (e.g. `row_generator`)
    pub step_type: String,

    /// Number of parallel copies
    pub copies: usize,

    /// Type-specific configuration, deserialized by the step implementation
    pub config: serde_yaml::Value,

    /// Send each row to one target instead of copying it to all targets
    pub distribute: bool,

    /// Field whose value selects the copy of a downstream step
    pub partition_by: Option<String>,

    /// Error row handling
    pub error_handling: Option<StepErrorMeta>,

    pub description: Option<String>,
}

impl StepMeta {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            copies: 1,
            config: serde_yaml::Value::Null,
            distribute: false,
            partition_by: None,
            error_handling: None,
            description: None,
        }
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    pub fn with_config(mut self, config: serde_yaml::Value) -> Self {
        self.config = config;
        self
    }

    /// Configuration from an inline YAML document
    pub fn with_yaml_config(self, yaml: &str) -> Result<Self, serde_yaml::Error> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(self.with_config(config))
    }

    pub fn with_distribution(mut self, distribute: bool) -> Self {
        self.distribute = distribute;
        self
    }

    pub fn with_partitioning(mut self, field: impl Into<String>) -> Self {
        self.partition_by = Some(field.into());
        self
    }

    pub fn with_error_handling(mut self, error_handling: StepErrorMeta) -> Self {
        self.error_handling = Some(error_handling);
        self
    }

    pub fn is_partitioned(&self) -> bool {
        self.partition_by.is_some()
    }

    /// Whether per-row failures turn into error rows instead of failing the step
    pub fn handles_errors(&self) -> bool {
        self.error_handling.as_ref().is_some_and(|e| e.enabled)
    }

    /// Step that receives the error rows, if any
    pub fn error_target(&self) -> Option<&str> {
        self.error_handling
            .as_ref()
            .filter(|e| e.enabled)
            .and_then(|e| e.target.as_deref())
    }
}

fn default_true() -> bool {
    true
}

fn default_count_field() -> String {
    "error_count".to_string()
}

fn default_descriptions_field() -> String {
    "error_descriptions".to_string()
}

fn default_fields_field() -> String {
    "error_fields".to_string()
}

fn default_codes_field() -> String {
    "error_codes".to_string()
}

/// Error row handling of a step
///
/// Empty field names leave the corresponding column out of the error row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepErrorMeta {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Step that receives the error rows; without one they are only counted
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default = "default_count_field")]
    pub count_field: String,

    #[serde(default = "default_descriptions_field")]
    pub descriptions_field: String,

    #[serde(default = "default_fields_field")]
    pub fields_field: String,

    #[serde(default = "default_codes_field")]
    pub codes_field: String,

    /// Fail the step once more rows than this were rejected
    #[serde(default)]
    pub max_errors: Option<u64>,

    /// Fail the step once the rejected share of rows read exceeds this percentage
    #[serde(default)]
    pub max_percent_errors: Option<u8>,

    /// Rows to read before the percentage limit applies
    #[serde(default)]
    pub min_rows_for_percent: u64,
}

impl Default for StepErrorMeta {
    fn default() -> Self {
        Self {
            enabled: true,
            target: None,
            count_field: default_count_field(),
            descriptions_field: default_descriptions_field(),
            fields_field: default_fields_field(),
            codes_field: default_codes_field(),
            max_errors: None,
            max_percent_errors: None,
            min_rows_for_percent: 0,
        }
    }
}

/// A rejection limit that was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionLimit {
    MaxErrors { rejected: u64, max: u64 },
    MaxPercent { percent: u64, max: u8 },
}

impl StepErrorMeta {
    pub fn to_step(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn with_max_errors(mut self, max_errors: u64) -> Self {
        self.max_errors = Some(max_errors);
        self
    }

    pub fn with_max_percent_errors(mut self, percent: u8, min_rows: u64) -> Self {
        self.max_percent_errors = Some(percent);
        self.min_rows_for_percent = min_rows;
        self
    }

    /// Layout of the error rows: the input fields followed by the error fields
    pub fn error_row_meta(&self, input: &RowMeta, origin: &str) -> RowMeta {
        let mut meta = input.clone();
        let extra = [
            (&self.count_field, ValueType::Integer),
            (&self.descriptions_field, ValueType::String),
            (&self.fields_field, ValueType::String),
            (&self.codes_field, ValueType::String),
        ];
        for (name, value_type) in extra {
            if !name.is_empty() {
                meta.add(ValueMeta::new(name.as_str(), value_type).with_origin(origin));
            }
        }
        meta
    }

    /// Values appended to a rejected row, in the order of [`Self::error_row_meta`]
    pub fn error_values(&self, error: &RowError) -> Vec<Value> {
        let mut values = Vec::with_capacity(4);
        if !self.count_field.is_empty() {
            values.push(Value::Integer(1));
        }
        if !self.descriptions_field.is_empty() {
            values.push(Value::String(error.description.clone()));
        }
        if !self.fields_field.is_empty() {
            values.push(Value::String(error.fields.join(",")));
        }
        if !self.codes_field.is_empty() {
            values.push(Value::String(error.code.clone()));
        }
        values
    }

    /// Checks the rejection counters against the configured limits
    pub fn exceeded_limit(&self, rejected: u64, read: u64) -> Option<RejectionLimit> {
        if let Some(max) = self.max_errors {
            if rejected > max {
                return Some(RejectionLimit::MaxErrors { rejected, max });
            }
        }
        if let Some(max) = self.max_percent_errors {
            let enough_rows = read > 0 && read >= self.min_rows_for_percent;
            if rejected > 0 && enough_rows {
                let percent = (rejected * 100).div_ceil(read);
                if percent > u64::from(max) {
                    return Some(RejectionLimit::MaxPercent { percent, max });
                }
            }
        }
        None
    }
}
