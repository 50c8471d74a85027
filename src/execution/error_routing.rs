//! Error row handling of a step copy
//!
//! A rejected row keeps its input values and gets the error columns
//! appended. Error rows go round-robin to the copies of the error target;
//! without a target they are only counted.

use crate::core::error::{RowError, RowSetError};
use crate::core::row::{Row, RowMeta};
use crate::core::step::{RejectionLimit, StepErrorMeta};
use crate::execution::executor::RowListener;
use crate::execution::row_set::RowSet;
use std::sync::{Arc, OnceLock};

#[derive(Debug)]
pub(crate) struct ErrorRouter {
    step_name: String,
    meta: Option<StepErrorMeta>,
    row_sets: Vec<Arc<RowSet>>,
    next: usize,
    layout: Option<Arc<RowMeta>>,
    published: Arc<OnceLock<Arc<RowMeta>>>,
}

impl ErrorRouter {
    /// `meta` is `None` when error handling is off for the step
    pub fn new(
        step_name: impl Into<String>,
        meta: Option<StepErrorMeta>,
        row_sets: Vec<Arc<RowSet>>,
        published: Arc<OnceLock<Arc<RowMeta>>>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            meta: meta.filter(|m| m.enabled),
            row_sets,
            next: 0,
            layout: None,
            published,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.meta.is_some()
    }

    /// Fixes the error row layout from the layout of the rejected rows
    pub fn bind(&mut self, input: &RowMeta) {
        let Some(meta) = &self.meta else {
            return;
        };
        let layout = Arc::new(meta.error_row_meta(input, &self.step_name));
        // copies of one step publish the same layout, the first one wins
        let _ = self.published.set(Arc::clone(&layout));
        self.layout = Some(layout);
    }

    /// Writes the error row for `row`
    pub fn put_error(
        &mut self,
        input: &RowMeta,
        row: &Row,
        error: &RowError,
        listeners: &[Arc<dyn RowListener>],
    ) -> Result<(), RowSetError> {
        let Some(meta) = &self.meta else {
            return Ok(());
        };
        let error_row = row.extended(meta.error_values(error));

        if self.layout.is_none() {
            self.bind(input);
        }
        let Some(layout) = self.layout.clone() else {
            return Ok(());
        };

        for listener in listeners {
            listener.error_row_written(&layout, &error_row);
        }

        if self.row_sets.is_empty() {
            return Ok(());
        }
        let index = self.next;
        self.next = (self.next + 1) % self.row_sets.len();
        self.row_sets[index].put(&layout, error_row)
    }

    pub fn exceeded_limit(&self, rejected: u64, read: u64) -> Option<RejectionLimit> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.exceeded_limit(rejected, read))
    }

    pub fn set_done(&self) {
        for row_set in &self.row_sets {
            row_set.set_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{Value, ValueType};
    use crate::core::value_meta::ValueMeta;

    fn input() -> RowMeta {
        RowMeta::new().with_field(ValueMeta::new("id", ValueType::Integer))
    }

    #[test]
    fn test_error_row_carries_input_and_error_columns() {
        let target = Arc::new(RowSet::between("parse", 0, "rejects", 0, 10));
        let published = Arc::new(OnceLock::new());
        let mut router = ErrorRouter::new(
            "parse",
            Some(StepErrorMeta::to_step("rejects")),
            vec![Arc::clone(&target)],
            Arc::clone(&published),
        );
        router.bind(&input());

        let error = RowError::new("E42", "bad id").with_field("id");
        router
            .put_error(&input(), &Row::new(vec![Value::Integer(7)]), &error, &[])
            .unwrap();

        let row = target.try_get().unwrap();
        let expected = Row::new(vec![
            Value::Integer(7),
            Value::Integer(1),
            Value::from("bad id"),
            Value::from("id"),
            Value::from("E42"),
        ]);
        assert_eq!(row, crate::execution::row_set::Fetch::Row(expected));
        assert_eq!(published.get().unwrap().len(), 5);
    }

    #[test]
    fn test_without_target_rows_are_dropped() {
        let mut router = ErrorRouter::new(
            "parse",
            Some(StepErrorMeta::default()),
            Vec::new(),
            Arc::new(OnceLock::new()),
        );
        let error = RowError::new("E1", "x");
        router
            .put_error(&input(), &Row::new(vec![Value::Integer(1)]), &error, &[])
            .unwrap();
        assert!(router.is_enabled());
    }

    #[test]
    fn test_disabled_handling() {
        let meta = StepErrorMeta {
            enabled: false,
            ..StepErrorMeta::default()
        };
        let router = ErrorRouter::new("s", Some(meta), Vec::new(), Arc::new(OnceLock::new()));
        assert!(!router.is_enabled());
        assert_eq!(router.exceeded_limit(100, 100), None);
    }
}
