//! rowflow - a row-streaming ETL engine
//!
//! Pipelines are graphs of steps connected by bounded row sets. Every copy
//! of a step runs on its own thread and streams typed rows downstream.

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod steps;

// Re-export commonly used types
pub use crate::core::{
    EngineError, ExecutionStatus, PipelineMeta, Row, RowMeta, StepError, StepMeta, StepStatus,
    Value, ValueMeta, ValueType, VariableSpace,
};
pub use crate::core::config::PipelineConfig;
pub use execution::{
    ExecutionEngine, ExecutionEvent, PipelineExecution, PipelineResult, RowListener, StopHandle,
};
pub use steps::{RowSink, Step, StepContext, StepRegistry};
