//! Test: variables flow into step configuration and out of set_variables

use crate::helpers::*;
use rowflow::core::{ExecutionStatus, PipelineMeta, Value, ValueType, VariableSpace};
use rowflow::ExecutionEngine;

fn totals_row() -> rowflow::core::StepMeta {
    static_rows(
        "input",
        &[("region", ValueType::String), ("total", ValueType::Integer)],
        &[&["EU", "12"]],
    )
}

#[test]
fn test_set_variables_writes_the_pipeline_scope() {
    let pipeline = PipelineMeta::new("vars")
        .with_step(totals_row())
        .with_step(yaml_step(
            "assign",
            "set_variables",
            "assignments:\n  - field: region\n    variable: REGION\n  - field: total\n    variable: TOTAL\n",
        ))
        .with_hop("input", "assign");

    let observed = run_observed(&pipeline, "assign");
    assert!(observed.result.success, "failures: {:?}", observed.result.failures());
    assert_totals(&observed.result, "assign", 1, 1, 0);
    assert_eq!(observed.variables.get("REGION").as_deref(), Some("EU"));
    assert_eq!(observed.variables.get("TOTAL").as_deref(), Some("12"));
}

#[test]
fn test_set_variables_parent_scope() {
    let parent = VariableSpace::root();
    let pipeline = PipelineMeta::new("vars")
        .with_step(totals_row())
        .with_step(yaml_step(
            "assign",
            "set_variables",
            "scope: parent\nassignments:\n  - field: region\n    variable: REGION\n",
        ))
        .with_hop("input", "assign");

    let result = ExecutionEngine::new(registry())
        .with_parent_variables(parent.clone())
        .execute(&pipeline)
        .unwrap();
    assert!(result.success);
    assert_eq!(parent.get("REGION").as_deref(), Some("EU"));
}

#[test]
fn test_set_variables_rejects_a_second_row() {
    let pipeline = PipelineMeta::new("vars")
        .with_step(numbered_rows("input", 2))
        .with_step(yaml_step(
            "assign",
            "set_variables",
            "assignments:\n  - field: id\n    variable: ID\n",
        ))
        .with_hop("input", "assign");

    let result = run(&pipeline);
    assert_eq!(result.status, ExecutionStatus::Failed);
    let assign = result.step("assign").unwrap();
    assert_eq!(assign.lines_read, 2);
    assert_eq!(assign.errors, 1);
}

#[test]
fn test_set_variables_without_rows_sets_nothing() {
    let pipeline = PipelineMeta::new("vars")
        .with_step(static_rows("input", &[("id", ValueType::Integer)], &[]))
        .with_step(yaml_step(
            "assign",
            "set_variables",
            "assignments:\n  - field: id\n    variable: ID\n    default: \"0\"\n",
        ))
        .with_hop("input", "assign");

    let observed = run_observed(&pipeline, "assign");
    assert!(observed.result.success);
    assert!(observed.variables.get("ID").is_none());
}

#[test]
fn test_pipeline_variables_drive_step_configuration() {
    let pipeline = PipelineMeta::new("generated")
        .with_variable("ROWS", "7")
        .with_variable("GREETING", "hello")
        .with_step(yaml_step(
            "generate",
            "row_generator",
            r#"
limit: "${ROWS}"
fields:
  - name: greeting
    value: "%%GREETING%% from ${Internal.Pipeline.Name}"
  - name: step
    value: "${Internal.Step.Name}"
"#,
        ))
        .with_step(yaml_step("output", "dummy", ""))
        .with_hop("generate", "output");

    let observed = run_observed(&pipeline, "output");
    assert!(observed.result.success, "failures: {:?}", observed.result.failures());
    assert_totals(&observed.result, "output", 7, 7, 0);

    let rows = observed.listener.read();
    assert!(column(&rows, 0)
        .iter()
        .all(|v| *v == Value::from("hello from generated")));
    assert_eq!(rows[0].value(1), &Value::from("generate"));
    assert_eq!(
        observed.variables.get("Internal.Pipeline.Name").as_deref(),
        Some("generated")
    );
}

#[test]
fn test_unresolvable_limit_fails_validation() {
    let pipeline = PipelineMeta::new("generated")
        .with_step(yaml_step("generate", "row_generator", "limit: \"${MISSING}\"\n"));

    let err = engine().validate(&pipeline).unwrap_err();
    assert!(err.to_string().contains("MISSING"));
}
