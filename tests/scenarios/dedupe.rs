//! Test: adjacent duplicate removal with counting and rejection

use crate::helpers::*;
use rowflow::core::{EngineError, ExecutionStatus, PipelineMeta, StepErrorMeta, Value, ValueType};

fn customers(values: &[&str]) -> rowflow::core::StepMeta {
    let rows: Vec<Vec<&str>> = values.iter().map(|v| vec![*v]).collect();
    let rows: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
    static_rows("input", &[("customer", ValueType::String)], &rows)
}

#[test]
fn test_dedupe_with_counts() {
    let pipeline = PipelineMeta::new("dedupe")
        .with_step(customers(&["A", "A", "B", "B", "B", "C"]))
        .with_step(yaml_step(
            "dedupe",
            "unique_rows",
            "compare_fields:\n  - name: customer\ncount_rows: true\n",
        ))
        .with_step(yaml_step("output", "dummy", ""))
        .with_hop("input", "dedupe")
        .with_hop("dedupe", "output");

    let observed = run_observed(&pipeline, "output");
    let result = &observed.result;

    assert!(result.success, "failures: {:?}", result.failures());
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_totals(result, "dedupe", 6, 3, 0);

    let rows = observed.listener.read();
    assert_eq!(
        column(&rows, 0),
        vec![Value::from("A"), Value::from("B"), Value::from("C")]
    );
    assert_eq!(
        column(&rows, 1),
        vec![Value::Integer(2), Value::Integer(3), Value::Integer(1)]
    );
    assert!(observed.row_sets.iter().all(|rs| rs.is_done() && !rs.is_errored()));
}

#[test]
fn test_case_insensitive_keys() {
    let pipeline = PipelineMeta::new("dedupe")
        .with_step(customers(&["acme", "ACME", "Acme", "globex"]))
        .with_step(yaml_step(
            "dedupe",
            "unique_rows",
            "compare_fields:\n  - name: customer\n    case_insensitive: true\n",
        ))
        .with_hop("input", "dedupe");

    let observed = run_observed(&pipeline, "dedupe");
    assert!(observed.result.success);
    assert_eq!(
        column(&observed.listener.written(), 0),
        vec![Value::from("acme"), Value::from("globex")]
    );
}

#[test]
fn test_duplicates_become_error_rows() {
    let pipeline = PipelineMeta::new("dedupe")
        .with_step(customers(&["A", "A", "B", "A"]))
        .with_step(
            yaml_step("dedupe", "unique_rows", "reject_duplicates: true\n")
                .with_error_handling(StepErrorMeta::to_step("dupes")),
        )
        .with_step(yaml_step("output", "dummy", ""))
        .with_step(yaml_step("dupes", "dummy", ""))
        .with_hop("input", "dedupe")
        .with_hop("dedupe", "output");

    let observed = run_observed(&pipeline, "dedupe");
    let result = &observed.result;

    assert!(result.success, "failures: {:?}", result.failures());
    // the trailing A is a new group, only the second row is a duplicate
    assert_totals(result, "dedupe", 4, 3, 1);
    assert_totals(result, "dupes", 1, 1, 0);
    assert_eq!(result.error_rows, 1);

    let errors = observed.listener.errors();
    assert_eq!(errors.len(), 1);
    let (layout, row) = &errors[0];
    let codes = layout.index_of("error_codes").unwrap();
    let descriptions = layout.index_of("error_descriptions").unwrap();
    assert_eq!(row.value(codes), &Value::from("UNQ001"));
    assert!(row
        .value(descriptions)
        .as_str()
        .unwrap()
        .starts_with("Duplicate row found"));
}

#[test]
fn test_reject_without_error_handling_is_a_config_error() {
    let pipeline = PipelineMeta::new("dedupe")
        .with_step(customers(&["A"]))
        .with_step(yaml_step("dedupe", "unique_rows", "reject_duplicates: true\n"))
        .with_hop("input", "dedupe");

    let err = engine().validate(&pipeline).unwrap_err();
    assert!(matches!(err, EngineError::InvalidStepConfig { ref step, .. } if step == "dedupe"));

    // the same check runs when the copies initialize
    let result = run(&pipeline);
    assert!(!result.success);
    assert_eq!(result.status, ExecutionStatus::Failed);
}
