//! Test: execution events, row listeners and progress

use crate::helpers::*;
use rowflow::core::{EngineError, ExecutionStatus, PipelineMeta, StepStatus};
use rowflow::{ExecutionEvent, RowListener};
use std::sync::{Arc, Mutex};

fn simple() -> PipelineMeta {
    PipelineMeta::new("events")
        .with_step(numbered_rows("input", 6))
        .with_step(yaml_step("work", "dummy", "").with_copies(2))
        .with_step(yaml_step("output", "dummy", ""))
        .with_hop("input", "work")
        .with_hop("work", "output")
}

fn record(events: &Arc<Mutex<Vec<ExecutionEvent>>>) -> impl Fn(ExecutionEvent) + Send + Sync + 'static {
    let events = Arc::clone(events);
    move |event| events.lock().unwrap().push(event)
}

#[test]
fn test_events_bracket_the_run() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let engine = engine();
    engine.add_event_handler(record(&events));

    let result = engine.execute(&simple()).unwrap();
    assert!(result.success);

    let events = events.lock().unwrap();
    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::PipelineStarted { pipeline_name, .. }) if pipeline_name == "events"
    ));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::PipelineFinished {
            status: ExecutionStatus::Completed,
            ..
        })
    ));

    let started = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StepStarted { .. }))
        .count();
    let finished: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepFinished {
                step,
                status,
                lines_read,
                ..
            } => Some((step.clone(), *status, *lines_read)),
            _ => None,
        })
        .collect();
    // input, two copies of work, output
    assert_eq!(started, 4);
    assert_eq!(finished.len(), 4);
    assert!(finished.iter().all(|(_, status, _)| *status == StepStatus::OutputDone));
    let work_read: u64 = finished
        .iter()
        .filter(|(step, _, _)| step == "work")
        .map(|(_, _, read)| read)
        .sum();
    assert_eq!(work_read, 6);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepFailed { .. })));
}

#[test]
fn test_failures_raise_a_step_failed_event() {
    let pipeline = PipelineMeta::new("events")
        .with_step(numbered_rows("input", 3))
        .with_step(fail_on_row(
            "check",
            FailOnRowConfig {
                rows: vec![1],
                ..Default::default()
            },
        ))
        .with_hop("input", "check");

    let events = Arc::new(Mutex::new(Vec::new()));
    let execution = engine().prepare(&pipeline).unwrap();
    execution.add_event_handler(record(&events));
    let result = execution.wait_until_finished();
    assert_eq!(result.status, ExecutionStatus::Failed);

    let events = events.lock().unwrap();
    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepFailed { step, error, .. } => Some((step.clone(), error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "check");
    assert!(failed[0].1.contains("failed on row 1"));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::PipelineFinished {
            status: ExecutionStatus::Failed,
            ..
        })
    ));
}

#[test]
fn test_row_listeners_see_every_row() {
    let observed = run_observed(&simple(), "work");
    assert!(observed.result.success);
    // both copies report to the same listener
    assert_eq!(observed.listener.read().len(), 6);
    assert_eq!(observed.listener.written().len(), 6);
    assert!(observed.listener.errors().is_empty());
}

#[test]
fn test_row_listener_registration_rules() {
    let mut execution = engine().prepare(&simple()).unwrap();
    let listener: Arc<dyn RowListener> = Arc::new(CollectingListener::default());

    let err = execution
        .add_row_listener("nope", Arc::clone(&listener))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownStep(ref step) if step == "nope"));

    execution.start().unwrap();
    let err = execution.add_row_listener("work", listener).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyStarted));
    assert!(matches!(execution.start(), Err(EngineError::AlreadyStarted)));

    let result = execution.wait_until_finished();
    assert!(result.success);
}

#[test]
fn test_progress_after_the_run() {
    let execution = engine().prepare(&simple()).unwrap();
    let progress = execution.progress();
    assert_eq!(progress.total_units(), 4);
    assert_eq!(progress.finished_units(), 0);

    let result = execution.wait_until_finished();
    assert!(result.success);
    assert_eq!(progress.finished_units(), 4);
    // 6 rows written by input, work and output each
    assert_eq!(progress.lines_written(), 18);
    let snapshot = progress.snapshot();
    assert_eq!(snapshot.len(), 4);
    // every copy was disposed once the run ended
    assert!(snapshot.iter().all(|s| s.status == StepStatus::Disposed));
}
