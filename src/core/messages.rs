//! Message catalog for user-facing error and log texts
//!
//! Templates use positional `{0}`, `{1}` arguments. A catalog is created
//! once and handed to the engine, which passes it to every step.

use std::collections::HashMap;
use std::fmt::Display;

pub const FIELD_NOT_FOUND: &str = "step.field_not_found";
pub const TOO_MANY_ERRORS: &str = "error_handling.too_many_errors";
pub const TOO_MANY_ERRORS_PERCENT: &str = "error_handling.too_many_errors_percent";
pub const SCHEMA_DRIFT: &str = "engine.schema_drift";
pub const ROW_ARITY: &str = "engine.row_arity";
pub const DUPLICATE_ROW: &str = "unique_rows.duplicate_row";
pub const CONVERSION_FAILED: &str = "select_values.conversion_failed";
pub const TOO_MANY_ROWS: &str = "set_variables.too_many_rows";
pub const UNKNOWN_TARGET: &str = "engine.unknown_target";
pub const NOT_INITIALIZED: &str = "engine.not_initialized";
pub const STEP_PANICKED: &str = "engine.step_panicked";

const ENGLISH: &[(&str, &str)] = &[
    (FIELD_NOT_FOUND, "Field [{0}] couldn't be found in the input stream"),
    (TOO_MANY_ERRORS, "Too many rows rejected: {0} errors, the maximum is {1}"),
    (
        TOO_MANY_ERRORS_PERCENT,
        "Too many rows rejected: {0}% of the rows read, the maximum is {1}%",
    ),
    (
        SCHEMA_DRIFT,
        "Input [{0}] delivers a row layout that differs from the first input: {1} vs {2}",
    ),
    (ROW_ARITY, "Row has {0} values but its layout describes {1} fields"),
    (DUPLICATE_ROW, "Duplicate row found: {0}"),
    (CONVERSION_FAILED, "Couldn't convert field [{0}]: {1}"),
    (
        TOO_MANY_ROWS,
        "Only one input row is allowed to set variables, received another one",
    ),
    (UNKNOWN_TARGET, "Row was sent to [{0}] but no hop leads there"),
    (NOT_INITIALIZED, "Step was started without being initialized"),
    (STEP_PANICKED, "Step thread panicked: {0}"),
];

/// Keyed message templates
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: HashMap<String, String>,
}

impl MessageCatalog {
    /// The built-in English catalog
    pub fn english() -> Self {
        Self {
            templates: ENGLISH
                .iter()
                .map(|(key, template)| (key.to_string(), template.to_string()))
                .collect(),
        }
    }

    /// Replaces or adds a template
    pub fn with_template(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(key.into(), template.into());
        self
    }

    pub fn get(&self, key: &str, args: &[&dyn Display]) -> String {
        match self.templates.get(key) {
            Some(template) => {
                let mut text = template.clone();
                for (i, arg) in args.iter().enumerate() {
                    text = text.replace(&format!("{{{}}}", i), &arg.to_string());
                }
                text
            }
            None => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                if rendered.is_empty() {
                    key.to_string()
                } else {
                    format!("{} ({})", key, rendered.join(", "))
                }
            }
        }
    }
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::english()
    }
}
