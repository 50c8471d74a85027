//! Test: pipelines defined in YAML, end to end

use crate::helpers::*;
use rowflow::core::{ExecutionStatus, Value};
use rowflow::PipelineConfig;
use std::io::Write;
use std::sync::Arc;

const ORDERS: &str = r#"
name: orders
description: Split orders by amount
variables:
  ROWS: 4
  THRESHOLD: "1000"
settings:
  row_set_size: 2
steps:
  - name: generate
    type: row_generator
    config:
      limit: "${ROWS}"
      fields:
        - name: amount
          type: number
          value: "1234.5"
        - name: region
          value: EU
  - name: route
    type: filter_rows
    config:
      field: amount
      operator: ">"
      value: "${THRESHOLD}"
      send_true_to: big
      send_false_to: small
  - name: big
    type: select_values
    config:
      fields:
        - name: amount
        - name: region
          rename: zone
  - name: small
    type: dummy
hops:
  - from: generate
    to: route
  - from: route
    to: big
  - from: route
    to: small
"#;

#[test]
fn test_yaml_pipeline_routes_and_renames() {
    let config = PipelineConfig::from_yaml(ORDERS).unwrap();
    assert_eq!(config.variables().get("ROWS").map(String::as_str), Some("4"));
    let pipeline = config.to_pipeline();
    assert_eq!(pipeline.settings.row_set_size, 2);

    let mut execution = engine().prepare(&pipeline).unwrap();
    let listener = Arc::new(CollectingListener::default());
    execution.add_row_listener("big", listener.clone()).unwrap();
    let result = execution.wait_until_finished();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_totals(&result, "route", 4, 4, 0);
    assert_totals(&result, "big", 4, 4, 0);
    assert_totals(&result, "small", 0, 0, 0);

    let rows = listener.written();
    assert_eq!(rows.len(), 4);
    assert!(column(&rows, 0).iter().all(|v| *v == Value::Number(1234.5)));
    assert!(column(&rows, 1).iter().all(|v| *v == Value::from("EU")));
}

#[test]
fn test_yaml_pipeline_with_copies_and_error_handling() {
    let yaml = r#"
name: conversions
steps:
  - name: generate
    type: row_generator
    config:
      limit: 3
      fields:
        - name: code
          value: "A1"
  - name: convert
    type: select_values
    copies: 2
    config:
      fields:
        - name: code
          type: integer
    error_handling:
      target: rejects
      codes_field: ""
  - name: rejects
    type: dummy
hops:
  - from: generate
    to: convert
"#;
    let pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline();
    let observed = run_observed(&pipeline, "convert");

    assert!(observed.result.success, "failures: {:?}", observed.result.failures());
    assert_totals(&observed.result, "convert", 3, 0, 3);
    assert_totals(&observed.result, "rejects", 3, 3, 0);
    let errors = observed.listener.errors();
    assert_eq!(errors.len(), 3);
    assert_eq!(
        errors[0].0.field_names(),
        vec!["code", "error_count", "error_descriptions", "error_fields"]
    );
}

#[test]
fn test_yaml_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(ORDERS.as_bytes()).unwrap();

    let config = PipelineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.name, "orders");
    assert_eq!(config.steps.len(), 4);
    assert!(engine().validate(&config.to_pipeline()).is_ok());
}

#[test]
fn test_invalid_yaml_pipelines() {
    let duplicate = r#"
name: broken
steps:
  - name: a
    type: dummy
  - name: a
    type: dummy
"#;
    let err = PipelineConfig::from_yaml(duplicate).unwrap_err();
    assert!(err.to_string().contains("Duplicate step name"));

    let dangling = r#"
name: broken
steps:
  - name: a
    type: dummy
hops:
  - from: a
    to: b
"#;
    let err = PipelineConfig::from_yaml(dangling).unwrap_err();
    assert!(err.to_string().contains("non-existent step 'b'"));

    let cyclic = r#"
name: broken
steps:
  - name: a
    type: dummy
  - name: b
    type: dummy
hops:
  - from: a
    to: b
  - from: b
    to: a
"#;
    assert!(PipelineConfig::from_yaml(cyclic).is_err());

    assert!(PipelineConfig::from_yaml("name: [unterminated").is_err());
    assert!(PipelineConfig::from_file("/does/not/exist.yaml").is_err());
}

#[test]
fn test_missing_filter_target_fails_validation() {
    let yaml = r#"
name: filter
steps:
  - name: generate
    type: row_generator
  - name: route
    type: filter_rows
    config:
      field: x
      operator: is_null
      send_true_to: nowhere
hops:
  - from: generate
    to: route
"#;
    let pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline();
    let err = engine().validate(&pipeline).unwrap_err();
    assert!(err.to_string().contains("nowhere"));
}
