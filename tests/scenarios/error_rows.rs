//! Test: recoverable row failures are routed as error rows

use crate::helpers::*;
use rowflow::core::{ExecutionStatus, PipelineMeta, StepErrorMeta, StepStatus, Value, ValueType};

fn amounts() -> rowflow::core::StepMeta {
    static_rows(
        "input",
        &[("id", ValueType::Integer), ("amount", ValueType::String)],
        &[&["1", "10"], &["2", "x"], &["3", "30"], &["4", "4y"]],
    )
}

fn to_integer(error_handling: StepErrorMeta) -> rowflow::core::StepMeta {
    yaml_step(
        "convert",
        "select_values",
        "fields:\n  - name: id\n  - name: amount\n    type: integer\n",
    )
    .with_error_handling(error_handling)
}

#[test]
fn test_conversion_failures_go_to_the_error_step() {
    let pipeline = PipelineMeta::new("errors")
        .with_step(amounts())
        .with_step(to_integer(StepErrorMeta::to_step("rejects")))
        .with_step(yaml_step("output", "dummy", ""))
        .with_step(yaml_step("rejects", "dummy", ""))
        .with_hop("input", "convert")
        .with_hop("convert", "output");

    let observed = run_observed(&pipeline, "convert");
    let result = &observed.result;

    assert!(result.success, "failures: {:?}", result.failures());
    assert_totals(result, "convert", 4, 2, 2);
    assert_totals(result, "output", 2, 2, 0);
    assert_totals(result, "rejects", 2, 2, 0);
    assert_eq!(result.error_rows, 2);
    assert_eq!(result.errors, 0);

    assert_eq!(
        column(&observed.listener.written(), 1),
        vec![Value::Integer(10), Value::Integer(30)]
    );

    let errors = observed.listener.errors();
    assert_eq!(errors.len(), 2);
    let (layout, first) = &errors[0];
    assert_eq!(
        layout.field_names(),
        vec![
            "id",
            "amount",
            "error_count",
            "error_descriptions",
            "error_fields",
            "error_codes"
        ]
    );
    assert_eq!(layout.field(2).unwrap().value_type, ValueType::Integer);
    assert_eq!(first.value(0), &Value::Integer(2));
    assert_eq!(first.value(1), &Value::from("x"));
    assert_eq!(first.value(2), &Value::Integer(1));
    assert_eq!(first.value(4), &Value::from("amount"));
    assert_eq!(first.value(5), &Value::from("SEL001"));
    assert!(first
        .value(3)
        .as_str()
        .unwrap()
        .starts_with("Couldn't convert field [amount]"));
}

#[test]
fn test_renamed_and_omitted_error_fields() {
    let handling = StepErrorMeta {
        count_field: String::new(),
        descriptions_field: "why".to_string(),
        fields_field: String::new(),
        codes_field: "code".to_string(),
        ..StepErrorMeta::to_step("rejects")
    };
    let pipeline = PipelineMeta::new("errors")
        .with_step(amounts())
        .with_step(to_integer(handling))
        .with_step(yaml_step("rejects", "dummy", ""))
        .with_hop("input", "convert");

    let observed = run_observed(&pipeline, "convert");
    assert!(observed.result.success);
    let (layout, _) = &observed.listener.errors()[0];
    assert_eq!(layout.field_names(), vec!["id", "amount", "why", "code"]);
}

#[test]
fn test_error_rows_without_target_are_counted() {
    let pipeline = PipelineMeta::new("errors")
        .with_step(amounts())
        .with_step(to_integer(StepErrorMeta::default()))
        .with_hop("input", "convert");

    let result = run(&pipeline);
    assert!(result.success);
    assert_totals(&result, "convert", 4, 2, 2);
    assert_eq!(result.error_rows, 2);
}

#[test]
fn test_without_error_handling_a_row_failure_is_fatal() {
    let pipeline = PipelineMeta::new("errors")
        .with_step(amounts())
        .with_step(yaml_step(
            "convert",
            "select_values",
            "fields:\n  - name: amount\n    type: integer\n",
        ))
        .with_hop("input", "convert");

    let result = run(&pipeline);
    assert_eq!(result.status, ExecutionStatus::Failed);
    let convert = result.step("convert").unwrap();
    assert_eq!(convert.lines_read, 2);
    assert_eq!(convert.lines_written, 1);
    assert_eq!(convert.errors, 1);
}

#[test]
fn test_max_errors_escalates() {
    let pipeline = PipelineMeta::new("limits")
        .with_step(numbered_rows("input", 10))
        .with_step(
            fail_on_row(
                "check",
                FailOnRowConfig {
                    rows: vec![2, 4, 6],
                    recoverable: true,
                    ..Default::default()
                },
            )
            .with_error_handling(StepErrorMeta::default().with_max_errors(2)),
        )
        .with_hop("input", "check");

    let result = run(&pipeline);
    assert_eq!(result.status, ExecutionStatus::Failed);
    let check = result.steps.iter().find(|s| s.step == "check").unwrap();
    assert_eq!(check.status, StepStatus::Errored);
    assert_eq!(check.lines_read, 6);
    assert_eq!(check.lines_rejected, 3);
    assert_eq!(check.errors, 1);
    assert!(check
        .error
        .as_deref()
        .unwrap()
        .contains("Too many rows rejected: 3 errors, the maximum is 2"));
}

#[test]
fn test_max_errors_not_reached() {
    let pipeline = PipelineMeta::new("limits")
        .with_step(numbered_rows("input", 10))
        .with_step(
            fail_on_row(
                "check",
                FailOnRowConfig {
                    rows: vec![2, 4],
                    recoverable: true,
                    ..Default::default()
                },
            )
            .with_error_handling(StepErrorMeta::default().with_max_errors(2)),
        )
        .with_hop("input", "check");

    let result = run(&pipeline);
    assert!(result.success);
    assert_totals(&result, "check", 10, 8, 2);
}

#[test]
fn test_percentage_limit_waits_for_min_rows() {
    let failing = |rows: Vec<u64>| {
        PipelineMeta::new("percent")
            .with_step(numbered_rows("input", 20))
            .with_step(
                fail_on_row(
                    "check",
                    FailOnRowConfig {
                        rows,
                        recoverable: true,
                        ..Default::default()
                    },
                )
                .with_error_handling(StepErrorMeta::default().with_max_percent_errors(20, 5)),
            )
            .with_hop("input", "check")
    };

    // 100% after the first row, but fewer rows than the minimum were read
    let early = run(&failing(vec![1]));
    assert!(early.success, "failures: {:?}", early.failures());

    // 2 of 7 rows is above 20%
    let late = run(&failing(vec![6, 7]));
    assert_eq!(late.status, ExecutionStatus::Failed);
    let check = late.step("check").unwrap();
    assert_eq!(check.lines_read, 7);
    assert_eq!(check.lines_rejected, 2);
}
