//! Test: stopping a run from another thread

use crate::helpers::*;
use rowflow::core::{EngineSettings, ExecutionStatus, PipelineMeta, StepStatus};
use std::thread;
use std::time::{Duration, Instant};

fn endless() -> PipelineMeta {
    let mut pipeline = PipelineMeta::new("endless")
        .with_step(yaml_step(
            "generate",
            "row_generator",
            "limit: 1000000000000\nfields:\n  - name: n\n    type: integer\n    value: 1\n",
        ))
        .with_step(yaml_step("slow", "dummy", "").with_copies(2))
        .with_step(yaml_step("output", "dummy", ""))
        .with_hop("generate", "slow")
        .with_hop("slow", "output");
    pipeline.settings = EngineSettings {
        row_set_size: 16,
        ..EngineSettings::default()
    };
    pipeline
}

#[test]
fn test_stop_handle_halts_a_running_pipeline() {
    let mut execution = engine().prepare(&endless()).unwrap();
    let stop = execution.stop_handle();
    let progress = execution.progress();
    let row_sets = execution.row_sets().to_vec();

    execution.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while progress.lines_written() < 100 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!stop.is_stopped());

    let stopper = thread::spawn(move || stop.stop());
    let result = execution.wait_until_finished();
    stopper.join().unwrap();

    assert_eq!(result.status, ExecutionStatus::Stopped);
    assert!(result.stopped);
    assert!(!result.success);
    assert_eq!(result.errors, 0);
    assert!(result
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Stopped));
    assert!(row_sets.iter().all(|rs| rs.is_errored()));
    assert_eq!(progress.finished_units(), progress.total_units());
}

#[test]
fn test_stop_is_idempotent() {
    let execution = engine().prepare(&endless()).unwrap();
    let stop = execution.stop_handle();
    let other = stop.clone();

    stop.stop();
    other.stop();
    assert!(stop.is_stopped());

    // stopped before it started: nothing runs to completion
    let result = execution.wait_until_finished();
    assert!(result.stopped);
    assert_eq!(result.status, ExecutionStatus::Stopped);
}
