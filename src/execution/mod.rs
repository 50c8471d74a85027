//! Pipeline execution engine
//!
//! Row sets, the per-copy execution units, graph wiring and the engine
//! that runs everything on threads.

pub mod engine;
pub(crate) mod error_routing;
pub mod executor;
pub mod result;
pub(crate) mod routing;
pub mod row_set;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, PipelineExecution};
pub use executor::RowListener;
pub use result::{PipelineResult, ProgressHandle, StepProgress, StepResult, StepTotals};
pub use row_set::{Fetch, RowSet};
pub use scheduler::{DispatchType, StopHandle};
