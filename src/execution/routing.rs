//! Routing of output rows to downstream row sets

use crate::core::error::{RowSetError, StepError, ValueError};
use crate::core::row::{Row, RowMeta};
use crate::core::value::Value;
use crate::core::value_meta::ValueMeta;
use crate::execution::row_set::RowSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) enum RouteError {
    UnknownTarget(String),
    RowSet(RowSetError),
    /// The partitioning field could not be rendered
    Partition(ValueError),
}

/// The row sets leading to one downstream step
#[derive(Debug)]
struct OutputTarget {
    step: String,
    row_sets: Vec<Arc<RowSet>>,
    next: usize,
    partition_field: Option<String>,
    partition: Option<(usize, ValueMeta)>,
}

impl OutputTarget {
    fn put(&mut self, meta: &Arc<RowMeta>, row: Row) -> Result<(), RouteError> {
        let index = match &self.partition {
            Some((field, field_meta)) => {
                partition_of(field_meta, row.value(*field), self.row_sets.len())
                    .map_err(RouteError::Partition)?
            }
            None => {
                let index = self.next;
                self.next = (self.next + 1) % self.row_sets.len();
                index
            }
        };
        self.row_sets[index].put(meta, row).map_err(RouteError::RowSet)
    }
}

/// Copies or distributes rows over the targets of a step copy
#[derive(Debug, Default)]
pub(crate) struct OutputRouter {
    targets: Vec<OutputTarget>,
    distribute: bool,
    next_target: usize,
}

impl OutputRouter {
    pub fn new(distribute: bool) -> Self {
        Self {
            distribute,
            ..Self::default()
        }
    }

    pub fn add_target(
        &mut self,
        step: impl Into<String>,
        row_sets: Vec<Arc<RowSet>>,
        partition_field: Option<String>,
    ) {
        if row_sets.is_empty() {
            return;
        }
        self.targets.push(OutputTarget {
            step: step.into(),
            row_sets,
            next: 0,
            partition_field,
            partition: None,
        });
    }

    /// Resolves partitioning fields against the output layout
    pub fn bind(&mut self, meta: &RowMeta) -> Result<(), StepError> {
        for target in &mut self.targets {
            if let Some(field) = &target.partition_field {
                let index = meta.require_index(field)?;
                target.partition = meta.field(index).map(|f| (index, f.clone()));
            }
        }
        Ok(())
    }

    /// Sends a row to every target, to the next target when distributing,
    /// or to `target` only when one is named
    pub fn route(
        &mut self,
        meta: &Arc<RowMeta>,
        target: Option<&str>,
        row: Row,
    ) -> Result<(), RouteError> {
        if let Some(name) = target {
            let output = self
                .targets
                .iter_mut()
                .find(|t| t.step == name)
                .ok_or_else(|| RouteError::UnknownTarget(name.to_string()))?;
            return output.put(meta, row);
        }

        match self.targets.len() {
            0 => Ok(()),
            1 => self.targets[0].put(meta, row),
            count if self.distribute => {
                let index = self.next_target;
                self.next_target = (self.next_target + 1) % count;
                self.targets[index].put(meta, row)
            }
            count => {
                for target in &mut self.targets[..count - 1] {
                    target.put(meta, row.clone())?;
                }
                self.targets[count - 1].put(meta, row)
            }
        }
    }

    pub fn set_done(&self) {
        for target in &self.targets {
            for row_set in &target.row_sets {
                row_set.set_done();
            }
        }
    }
}

/// Picks the consumer copy for a partitioning value
///
/// The value is hashed in its canonical string form, as `field` renders it,
/// so equal keys of different types land on the same copy. Nulls always go
/// to the first copy.
pub(crate) fn partition_of(field: &ValueMeta, value: &Value, copies: usize) -> Result<usize, ValueError> {
    if copies <= 1 || field.is_null(value) {
        return Ok(0);
    }
    let Some(text) = field.format_value(value)? else {
        return Ok(0);
    };
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    Ok((hasher.finish() % copies as u64) as usize)
}
