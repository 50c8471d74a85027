//! Test: copying, distributing and partitioning rows across steps and copies

use crate::helpers::*;
use rowflow::core::{EngineSettings, PipelineMeta, StepMeta, Value, ValueType};
use rowflow::execution::DispatchType;

#[test]
fn test_copy_mode_sends_every_row_to_every_target() {
    let pipeline = PipelineMeta::new("copy")
        .with_step(numbered_rows("input", 10))
        .with_step(yaml_step("left", "dummy", ""))
        .with_step(yaml_step("right", "dummy", ""))
        .with_hop("input", "left")
        .with_hop("input", "right");

    let result = run(&pipeline);
    assert!(result.success);
    // one written row per emitted row, however many targets receive it
    assert_totals(&result, "input", 0, 10, 0);
    assert_totals(&result, "left", 10, 10, 0);
    assert_totals(&result, "right", 10, 10, 0);
}

#[test]
fn test_distribute_mode_round_robins_targets() {
    let pipeline = PipelineMeta::new("distribute")
        .with_step(numbered_rows("input", 10).with_distribution(true))
        .with_step(yaml_step("left", "dummy", ""))
        .with_step(yaml_step("right", "dummy", ""))
        .with_hop("input", "left")
        .with_hop("input", "right");

    let observed = run_observed(&pipeline, "input");
    assert!(observed.result.success);
    assert_totals(&observed.result, "left", 5, 5, 0);
    assert_totals(&observed.result, "right", 5, 5, 0);
}

#[test]
fn test_round_robin_over_copies() {
    let pipeline = PipelineMeta::new("copies")
        .with_step(numbered_rows("input", 9))
        .with_step(yaml_step("work", "dummy", "").with_copies(3))
        .with_hop("input", "work");

    let result = run(&pipeline);
    assert!(result.success);
    assert_eq!(reads_per_copy(&result, "work"), vec![3, 3, 3]);
    assert_eq!(result.step("work").unwrap().copies, 3);
}

#[test]
fn test_partitioning_keeps_keys_on_one_copy() {
    let keys = ["north", "south", "east"];
    let rows: Vec<[&str; 1]> = (0..15).map(|i| [keys[i % 3]]).collect();
    let rows: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
    let pipeline = PipelineMeta::new("partition")
        .with_step(static_rows("input", &[("region", ValueType::String)], &rows))
        .with_step(
            yaml_step("work", "dummy", "")
                .with_copies(3)
                .with_partitioning("region"),
        )
        .with_hop("input", "work");

    let result = run(&pipeline);
    assert!(result.success, "failures: {:?}", result.failures());
    // five rows per key, and a key never straddles copies
    let reads = reads_per_copy(&result, "work");
    assert_eq!(reads.iter().sum::<u64>(), 15);
    assert!(reads.iter().all(|n| n % 5 == 0), "reads per copy: {:?}", reads);
}

#[test]
fn test_partition_field_must_exist() {
    let pipeline = PipelineMeta::new("partition")
        .with_step(numbered_rows("input", 3))
        .with_step(
            yaml_step("work", "dummy", "")
                .with_copies(2)
                .with_partitioning("missing"),
        )
        .with_hop("input", "work");

    let result = run(&pipeline);
    assert!(!result.success);
}

#[test]
fn test_equal_copies_pair_up() {
    let generator = StepMeta::new("generate", "row_generator")
        .with_copies(2)
        .with_yaml_config(
            r#"
limit: 5
fields:
  - name: copy
    type: integer
    value: "${Internal.Step.CopyNr}"
"#,
        )
        .unwrap();
    let pipeline = PipelineMeta::new("pairs")
        .with_step(generator)
        .with_step(yaml_step("work", "dummy", "").with_copies(2))
        .with_hop("generate", "work");

    assert_eq!(DispatchType::for_hop(2, 2, false), DispatchType::ManyToMany);

    let mut execution = engine().prepare(&pipeline).unwrap();
    let listener = std::sync::Arc::new(CollectingListener::default());
    execution.add_row_listener("work", listener.clone()).unwrap();
    assert_eq!(execution.row_sets().len(), 2);
    for row_set in execution.row_sets() {
        assert_eq!(row_set.origin_copy(), row_set.destination_copy());
    }

    let result = execution.wait_until_finished();
    assert!(result.success);
    assert_eq!(reads_per_copy(&result, "work"), vec![5, 5]);

    let copies = column(&listener.read(), 0);
    assert_eq!(copies.iter().filter(|v| **v == Value::Integer(0)).count(), 5);
    assert_eq!(copies.iter().filter(|v| **v == Value::Integer(1)).count(), 5);
}

#[test]
fn test_many_to_one_and_mesh() {
    let pipeline = PipelineMeta::new("mesh")
        .with_step(
            StepMeta::new("generate", "row_generator")
                .with_copies(2)
                .with_yaml_config("limit: 6\n")
                .unwrap(),
        )
        .with_step(yaml_step("spread", "dummy", "").with_copies(3))
        .with_step(yaml_step("collect", "dummy", ""))
        .with_hop("generate", "spread")
        .with_hop("spread", "collect");

    let execution = engine().prepare(&pipeline).unwrap();
    // 2 x 3 mesh plus 3 -> 1
    assert_eq!(execution.row_sets().len(), 9);

    let result = execution.wait_until_finished();
    assert!(result.success, "failures: {:?}", result.failures());
    assert_totals(&result, "spread", 12, 12, 0);
    assert_totals(&result, "collect", 12, 12, 0);
}

#[test]
fn test_tiny_row_sets_still_deliver_everything_in_order() {
    let mut pipeline = PipelineMeta::new("backpressure")
        .with_step(numbered_rows("input", 500))
        .with_step(yaml_step("a", "dummy", ""))
        .with_step(yaml_step("b", "dummy", ""))
        .with_hop("input", "a")
        .with_hop("a", "b");
    pipeline.settings = EngineSettings {
        row_set_size: 1,
        ..EngineSettings::default()
    };

    let observed = run_observed(&pipeline, "b");
    assert!(observed.result.success);
    let expected: Vec<Value> = (1..=500).map(Value::Integer).collect();
    assert_eq!(column(&observed.listener.read(), 0), expected);
    assert!(observed.row_sets.iter().all(|rs| rs.capacity() == 1));
}
