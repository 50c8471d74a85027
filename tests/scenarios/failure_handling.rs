//! Test: fatal step errors, init failures and schema drift halt the whole run

use crate::helpers::*;
use rowflow::core::{ExecutionStatus, PipelineMeta, StepStatus, ValueType};

#[test]
fn test_fatal_error_on_third_row_halts_everything() {
    let pipeline = PipelineMeta::new("fail-fast")
        .with_step(numbered_rows("input", 10))
        .with_step(fail_on_row(
            "transform",
            FailOnRowConfig {
                rows: vec![3],
                ..Default::default()
            },
        ))
        .with_step(yaml_step("output", "dummy", ""))
        .with_hop("input", "transform")
        .with_hop("transform", "output");

    let observed = run_observed(&pipeline, "output");
    let result = &observed.result;

    assert!(!result.success);
    assert!(!result.stopped);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.errors, 1);

    let transform = result.step("transform").unwrap();
    assert_eq!(transform.lines_read, 3);
    assert_eq!(transform.lines_written, 2);
    assert_eq!(transform.errors, 1);
    assert!(observed.listener.read().len() <= 2);

    assert!(!observed.row_sets.is_empty());
    assert!(observed.row_sets.iter().all(|rs| rs.is_errored()));

    let failed = result.steps.iter().find(|s| s.step == "transform").unwrap();
    assert_eq!(failed.status, StepStatus::Errored);
    assert!(failed.error.as_deref().unwrap().contains("failed on row 3"));
    assert_eq!(result.failures().len(), 1);

    // everybody else was halted, not failed
    for other in result.steps.iter().filter(|s| s.step != "transform") {
        assert_ne!(other.status, StepStatus::Errored, "{} errored", other.step);
        assert_eq!(other.errors, 0);
    }
}

#[test]
fn test_panic_in_a_step_is_a_fatal_error() {
    let pipeline = PipelineMeta::new("panics")
        .with_step(numbered_rows("input", 5))
        .with_step(fail_on_row(
            "transform",
            FailOnRowConfig {
                rows: vec![2],
                panic: true,
                ..Default::default()
            },
        ))
        .with_hop("input", "transform");

    let result = run(&pipeline);
    assert_eq!(result.status, ExecutionStatus::Failed);
    let failed = result.steps.iter().find(|s| s.step == "transform").unwrap();
    assert_eq!(failed.status, StepStatus::Errored);
    assert!(failed.error.as_deref().unwrap().contains("exploded on row 2"));
}

#[test]
fn test_init_failure_means_no_row_flows() {
    let pipeline = PipelineMeta::new("init")
        .with_step(numbered_rows("input", 100))
        .with_step(yaml_step("database", "failing_init", ""))
        .with_hop("input", "database");

    let mut execution = engine().prepare(&pipeline).unwrap();
    let row_sets = execution.row_sets().to_vec();

    let err = execution.start().unwrap_err();
    assert!(err.to_string().contains("database.0"));
    assert!(row_sets.iter().all(|rs| rs.is_errored()));

    let result = execution.wait_until_finished();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(!result.success);
    assert_totals(&result, "input", 0, 0, 0);
    assert!(result
        .steps
        .iter()
        .all(|s| matches!(s.status, StepStatus::Stopped | StepStatus::Errored)));
}

#[test]
fn test_unknown_step_type_is_rejected_before_running() {
    let pipeline = PipelineMeta::new("unknown").with_step(yaml_step("x", "does_not_exist", ""));
    let err = engine().execute(&pipeline).unwrap_err();
    assert!(err.to_string().contains("does_not_exist"));
}

#[test]
fn test_schema_drift_between_inputs_fails_the_consumer() {
    let pipeline = PipelineMeta::new("drift")
        .with_step(static_rows("narrow", &[("id", ValueType::Integer)], &[&["1"]]))
        .with_step(static_rows(
            "wide",
            &[("id", ValueType::Integer), ("name", ValueType::String)],
            &[&["2", "two"]],
        ))
        .with_step(yaml_step("merge", "dummy", ""))
        .with_hop("narrow", "merge")
        .with_hop("wide", "merge");

    let result = run(&pipeline);
    assert_eq!(result.status, ExecutionStatus::Failed);
    let merge = result.steps.iter().find(|s| s.step == "merge").unwrap();
    assert_eq!(merge.status, StepStatus::Errored);
    assert_eq!(merge.errors, 1);
}

#[test]
fn test_same_layout_inputs_merge() {
    let pipeline = PipelineMeta::new("merge")
        .with_step(numbered_rows("left", 4))
        .with_step(numbered_rows("right", 6))
        .with_step(yaml_step("merge", "dummy", ""))
        .with_hop("left", "merge")
        .with_hop("right", "merge");

    let result = run(&pipeline);
    assert!(result.success, "failures: {:?}", result.failures());
    assert_totals(&result, "merge", 10, 10, 0);
}
