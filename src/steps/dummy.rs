//! Pass-through step

use crate::core::error::StepError;
use crate::core::row::{Row, RowMeta};
use crate::steps::{RowSink, Step, StepContext};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DummyConfig {}

/// Forwards every row unchanged; without inputs it produces nothing
#[derive(Debug)]
pub struct Dummy;

impl Step for Dummy {
    type Config = DummyConfig;

    fn init(_config: &Arc<DummyConfig>, _ctx: &StepContext) -> Result<Self, StepError> {
        Ok(Dummy)
    }

    fn bind(&mut self, input: &RowMeta, _ctx: &StepContext) -> Result<RowMeta, StepError> {
        Ok(input.clone())
    }

    fn transform(&mut self, row: &Row, _ctx: &StepContext, out: &mut RowSink) -> Result<(), StepError> {
        out.put(row.clone());
        Ok(())
    }
}
