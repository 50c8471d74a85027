//! Test: output layouts are bound once, whatever the number of rows

use crate::helpers::*;
use rowflow::core::{PipelineMeta, Row, RowMeta, ValueType};
use rowflow::RowListener;
use std::sync::{Arc, Mutex};

/// Keeps the layout every written row was sent with
#[derive(Default)]
struct LayoutListener {
    layouts: Mutex<Vec<RowMeta>>,
}

impl RowListener for LayoutListener {
    fn row_written(&self, meta: &RowMeta, _row: &Row) {
        self.layouts.lock().unwrap().push(meta.clone());
    }
}

fn reshaped(rows: usize) -> PipelineMeta {
    let ids: Vec<[String; 2]> = (1..=rows).map(|i| [i.to_string(), format!("1,{:03}.50", i)]).collect();
    let rows: Vec<Vec<&str>> = ids.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
    let rows: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
    PipelineMeta::new("binding")
        .with_step(static_rows(
            "input",
            &[("id", ValueType::Integer), ("amount", ValueType::String)],
            &rows,
        ))
        .with_step(yaml_step(
            "reshape",
            "select_values",
            r##"
fields:
  - name: amount
    type: number
    format: "#,##0.00"
  - name: id
    rename: customer_id
    type: string
"##,
        ))
        .with_step(yaml_step("output", "dummy", ""))
        .with_hop("input", "reshape")
        .with_hop("reshape", "output")
}

/// Layouts written by `reshape` in a run over `rows` input rows
fn written_layouts(rows: usize) -> Vec<RowMeta> {
    let mut execution = engine().prepare(&reshaped(rows)).unwrap();
    let listener = Arc::new(LayoutListener::default());
    execution
        .add_row_listener("reshape", Arc::clone(&listener) as Arc<dyn RowListener>)
        .unwrap();
    let result = execution.wait_until_finished();
    assert!(result.success, "failures: {:?}", result.failures());
    assert_totals(&result, "reshape", rows as u64, rows as u64, 0);

    let layouts = listener.layouts.lock().unwrap().clone();
    layouts
}

#[test]
fn test_layout_is_the_same_for_every_row() {
    let layouts = written_layouts(50);
    assert_eq!(layouts.len(), 50);
    assert_eq!(layouts[0].field_names(), vec!["amount", "customer_id"]);
    assert_eq!(layouts[0].field(0).unwrap().value_type, ValueType::Number);
    assert_eq!(layouts[0].field(1).unwrap().value_type, ValueType::String);
    assert!(layouts.iter().all(|layout| *layout == layouts[0]));
}

#[test]
fn test_layout_does_not_depend_on_row_count() {
    let single = written_layouts(1);
    let pair = written_layouts(2);
    let many = written_layouts(25);
    assert_eq!(single[0], pair[1]);
    assert_eq!(single[0], many[24]);
}

#[test]
fn test_no_rows_binds_no_layout() {
    assert!(written_layouts(0).is_empty());
}
