//! Error types shared by the engine, the step contract and the loader

use crate::core::value::ValueType;
use std::fmt;
use thiserror::Error;

/// Failure of the value conversion layer
///
/// Conversions never panic on malformed input; they report one of these
/// instead so that every step sees the same messages for the same problem.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("{field} : couldn't convert {from} [{value}] to {to}: {reason}")]
    CannotConvert {
        field: String,
        from: ValueType,
        to: ValueType,
        value: String,
        reason: String,
    },

    #[error("{field} : invalid format mask '{mask}': {reason}")]
    InvalidMask {
        field: String,
        mask: String,
        reason: String,
    },

    #[error("{field} : values of type {value_type} can't be compared")]
    NotComparable { field: String, value_type: ValueType },
}

/// A recoverable, per-row failure raised by a step
///
/// When error handling is enabled for the step the offending row is routed
/// to the error row sets together with these details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Short machine readable reason code (e.g. `UNQ001`)
    pub code: String,

    /// Human readable description
    pub description: String,

    /// Names of the fields that caused the failure
    pub fields: Vec<String>,
}

impl RowError {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.description)
    }
}

/// Failures of a row set operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowSetError {
    #[error("row set {0} is in error state")]
    Errored(String),

    #[error("row set {0} is already done")]
    Done(String),

    #[error("row set {row_set} received a row with a different layout than its first row")]
    SchemaDrift { row_set: String },
}

/// Errors raised through the step capability contract
#[derive(Debug, Error)]
pub enum StepError {
    /// Per-row problem, routed to the error row set when enabled
    #[error("{0}")]
    Row(RowError),

    /// Conversion problem on a single row, recoverable like [`StepError::Row`]
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Invalid step configuration, detected before any row flows
    #[error("configuration error: {0}")]
    Config(String),

    /// A referenced field does not exist in the input layout
    #[error("field '{0}' not found in the input row")]
    FieldNotFound(String),

    /// Unrecoverable step failure
    #[error("{0}")]
    Fatal(String),

    /// Broken engine invariant (schema drift, lookups after binding, ...)
    #[error("internal engine error: {0}")]
    Internal(String),

    #[error(transparent)]
    RowSet(#[from] RowSetError),
}

impl StepError {
    /// Whether the error only concerns the current row
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StepError::Row(_) | StepError::Value(_))
    }

    /// Turn a recoverable error into the details written to the error row
    pub fn to_row_error(&self) -> Option<RowError> {
        match self {
            StepError::Row(row_error) => Some(row_error.clone()),
            StepError::Value(value_error) => {
                let mut row_error = RowError::new("CONV001", value_error.to_string());
                match value_error {
                    ValueError::CannotConvert { field, .. }
                    | ValueError::InvalidMask { field, .. }
                    | ValueError::NotComparable { field, .. } => {
                        row_error.fields.push(field.clone());
                    }
                }
                Some(row_error)
            }
            _ => None,
        }
    }
}

/// Errors raised while validating or preparing a pipeline
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("step '{0}' must run with at least one copy")]
    InvalidCopies(String),

    #[error("hop {from} -> {to} references non-existent step '{missing}'")]
    UnknownHopStep {
        from: String,
        to: String,
        missing: String,
    },

    #[error("duplicate hop {from} -> {to}")]
    DuplicateHop { from: String, to: String },

    #[error("cycle detected in pipeline graph involving step '{0}'")]
    CycleDetected(String),

    #[error("step '{step}' sends error rows to non-existent step '{target}'")]
    UnknownErrorTarget { step: String, target: String },

    #[error("unknown step type '{step_type}' for step '{step}'")]
    UnknownStepType { step: String, step_type: String },

    #[error("invalid configuration for step '{step}': {reason}")]
    InvalidStepConfig { step: String, reason: String },

    #[error("no step named '{0}'")]
    UnknownStep(String),

    #[error("pipeline execution has already been started")]
    AlreadyStarted,

    #[error("initialization failed for step(s): {}", .0.join(", "))]
    InitializationFailed(Vec<String>),

    #[error("unable to start thread for {unit}: {source}")]
    ThreadSpawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },
}
