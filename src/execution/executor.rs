//! Step executor - runs one copy of a step on its own thread
//!
//! The unit drives the step through its lifecycle: it reads rows from the
//! input row sets, hands them to the step, routes what the step writes and
//! turns per-row failures into error rows when error handling is enabled.

use crate::core::error::{RowSetError, StepError};
use crate::core::messages;
use crate::core::pipeline::EngineSettings;
use crate::core::row::{Row, RowMeta};
use crate::core::state::{StepMetrics, StepStatus};
use crate::core::step::RejectionLimit;
use crate::execution::engine::{emit_event, EventHandlers, ExecutionEvent};
use crate::execution::error_routing::ErrorRouter;
use crate::execution::routing::{OutputRouter, RouteError};
use crate::execution::row_set::{Fetch, RowSet};
use crate::execution::scheduler::RunControl;
use crate::steps::{Generate, RowSink, Step, StepContext};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Observes the rows passing through a step copy
///
/// Called on the step's thread; implementations must be cheap.
pub trait RowListener: Send + Sync {
    fn row_read(&self, _meta: &RowMeta, _row: &Row) {}

    fn row_written(&self, _meta: &RowMeta, _row: &Row) {}

    fn error_row_written(&self, _meta: &RowMeta, _row: &Row) {}
}

/// Everything a step copy is connected to
pub(crate) struct UnitWiring {
    pub context: StepContext,
    pub inputs: Vec<Arc<RowSet>>,
    pub outputs: OutputRouter,
    pub errors: ErrorRouter,
    pub metrics: Arc<StepMetrics>,
    pub control: Arc<RunControl>,
    pub settings: EngineSettings,
    pub events: EventHandlers,
}

/// A step copy as seen by the engine
pub(crate) trait ExecutionUnit: Send {
    /// `step.copy`, also used as thread name
    fn label(&self) -> &str;

    fn step_name(&self) -> &str;

    fn copy(&self) -> usize;

    fn metrics(&self) -> &Arc<StepMetrics>;

    fn add_row_listener(&mut self, listener: Arc<dyn RowListener>);

    fn init(&mut self) -> Result<(), StepError>;

    /// Processes rows until the input is exhausted, the run is stopped or the step fails
    fn run(&mut self);

    /// Marks a copy that never got a thread as failed
    fn fail_to_start(&mut self, message: String);

    /// Releases the step; later calls do nothing
    fn dispose(&mut self);

    /// Status the copy ended with, before disposal
    fn outcome(&self) -> StepStatus;

    fn error_message(&self) -> Option<&str>;
}

struct InputStream {
    row_set: Arc<RowSet>,
    verified: bool,
}

/// Why the row loop ended early
enum Halt {
    Stopped,
    Failed(StepError),
}

pub(crate) struct StepExecutionUnit<S: Step> {
    label: String,
    config: Arc<S::Config>,
    step: Option<S>,
    status: StepStatus,
    outcome: StepStatus,
    is_source: bool,
    context: StepContext,
    inputs: Vec<InputStream>,
    current_input: usize,
    block_count: usize,
    outputs: OutputRouter,
    errors: ErrorRouter,
    input_meta: Option<Arc<RowMeta>>,
    output_meta: Option<Arc<RowMeta>>,
    sink: RowSink,
    metrics: Arc<StepMetrics>,
    control: Arc<RunControl>,
    settings: EngineSettings,
    events: EventHandlers,
    listeners: Vec<Arc<dyn RowListener>>,
    error_message: Option<String>,
}

impl<S: Step> StepExecutionUnit<S> {
    pub fn new(config: Arc<S::Config>, wiring: UnitWiring) -> Self {
        let is_source = wiring.inputs.is_empty();
        Self {
            label: wiring.context.to_string(),
            config,
            step: None,
            status: StepStatus::Created,
            outcome: StepStatus::Created,
            is_source,
            context: wiring.context,
            inputs: wiring
                .inputs
                .into_iter()
                .map(|row_set| InputStream {
                    row_set,
                    verified: false,
                })
                .collect(),
            current_input: 0,
            block_count: 0,
            outputs: wiring.outputs,
            errors: wiring.errors,
            input_meta: None,
            output_meta: None,
            sink: RowSink::new(),
            metrics: wiring.metrics,
            control: wiring.control,
            settings: wiring.settings,
            events: wiring.events,
            listeners: Vec::new(),
            error_message: None,
        }
    }

    fn transition(&mut self, next: StepStatus) {
        if !self.status.can_transition_to(next) {
            warn!("{}: ignoring status change {} -> {}", self.label, self.status, next);
            return;
        }
        self.status = next;
        if next != StepStatus::Disposed {
            self.outcome = next;
        }
        self.metrics.set_status(next);
    }

    fn run_source(&mut self, step: &mut S) -> Result<(), Halt> {
        self.bind(step)?;
        loop {
            if self.control.is_stopped() {
                return Err(Halt::Stopped);
            }
            let state = step
                .generate(&self.context, &mut self.sink)
                .map_err(Halt::Failed)?;
            self.emit()?;
            if state == Generate::Done {
                break;
            }
        }
        step.flush(&self.context, &mut self.sink)
            .map_err(Halt::Failed)?;
        self.emit()
    }

    fn run_transform(&mut self, step: &mut S) -> Result<(), Halt> {
        loop {
            if self.control.is_stopped() {
                return Err(Halt::Stopped);
            }
            let Some(row) = self.next_row()? else {
                break;
            };
            if self.output_meta.is_none() {
                self.bind(step)?;
            }

            let read = self.metrics.increment_read();
            if let Some(meta) = &self.input_meta {
                trace!("{}: read {}", self.label, meta.describe_row(&row));
                for listener in &self.listeners {
                    listener.row_read(meta, &row);
                }
            }
            if self.settings.feedback_size > 0 && read % self.settings.feedback_size == 0 {
                info!("{}: linenr {}", self.label, read);
            }

            match step.transform(&row, &self.context, &mut self.sink) {
                Ok(()) => self.emit()?,
                Err(err) => {
                    self.sink.clear();
                    self.reject(row, err)?;
                }
            }
        }

        // a step that never saw a row has nothing to flush
        if self.output_meta.is_some() {
            step.flush(&self.context, &mut self.sink)
                .map_err(Halt::Failed)?;
            self.emit()?;
        }
        Ok(())
    }

    fn bind(&mut self, step: &mut S) -> Result<(), Halt> {
        let input = self.input_meta.clone().unwrap_or_default();
        let output = step.bind(&input, &self.context).map_err(Halt::Failed)?;
        self.outputs.bind(&output).map_err(Halt::Failed)?;
        if self.is_source {
            self.errors.bind(&output);
        } else {
            self.errors.bind(&input);
        }
        debug!("{}: output layout {:?}", self.label, output.field_names());
        self.output_meta = Some(Arc::new(output));
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Row>, Halt> {
        loop {
            match self.inputs.len() {
                0 => return Ok(None),
                1 => {
                    return match self.inputs[0].row_set.get() {
                        Ok(Some(row)) => self.accept(0, row).map(Some),
                        Ok(None) => {
                            self.inputs.clear();
                            Ok(None)
                        }
                        Err(e) => Err(self.row_set_halt(e)),
                    };
                }
                count => {
                    if self.current_input >= count {
                        self.current_input = 0;
                    }
                    if self.block_count >= self.settings.input_block_size {
                        self.rotate();
                    }
                    let index = self.current_input;
                    let poll = Duration::from_millis(self.settings.poll_interval_ms);
                    match self.inputs[index].row_set.get_timeout(poll) {
                        Ok(Fetch::Row(row)) => {
                            self.block_count += 1;
                            return self.accept(index, row).map(Some);
                        }
                        Ok(Fetch::Empty) => {
                            self.rotate();
                            if self.control.is_stopped() {
                                return Err(Halt::Stopped);
                            }
                        }
                        Ok(Fetch::EndOfStream) => {
                            self.inputs.remove(index);
                            self.block_count = 0;
                        }
                        Err(e) => return Err(self.row_set_halt(e)),
                    }
                }
            }
        }
    }

    fn rotate(&mut self) {
        self.block_count = 0;
        self.current_input = (self.current_input + 1) % self.inputs.len().max(1);
    }

    /// Checks a row against the layout of the first input
    fn accept(&mut self, index: usize, row: Row) -> Result<Row, Halt> {
        if !self.inputs[index].verified {
            let row_set = Arc::clone(&self.inputs[index].row_set);
            if let Some(meta) = row_set.row_meta() {
                match self.input_meta.clone() {
                    None => self.input_meta = Some(meta),
                    Some(first) => {
                        if self.settings.safe_mode
                            && !Arc::ptr_eq(&first, &meta)
                            && !first.same_shape(&meta)
                        {
                            let message = self.context.message(
                                messages::SCHEMA_DRIFT,
                                &[
                                    &row_set.name(),
                                    &first.field_names().join(","),
                                    &meta.field_names().join(","),
                                ],
                            );
                            return Err(Halt::Failed(StepError::Internal(message)));
                        }
                    }
                }
            }
            self.inputs[index].verified = true;
        }

        if self.settings.safe_mode {
            if let Some(meta) = &self.input_meta {
                if row.len() != meta.len() {
                    return Err(Halt::Failed(self.arity_error(&row, meta)));
                }
            }
        }
        Ok(row)
    }

    fn arity_error(&self, row: &Row, meta: &RowMeta) -> StepError {
        StepError::Internal(
            self.context
                .message(messages::ROW_ARITY, &[&row.len(), &meta.len()]),
        )
    }

    /// Routes everything the step wrote during the last call
    fn emit(&mut self) -> Result<(), Halt> {
        if self.sink.is_empty() {
            return Ok(());
        }
        let Some(meta) = self.output_meta.clone() else {
            return Err(Halt::Failed(StepError::Internal(format!(
                "{} wrote rows before its output layout was known",
                self.label
            ))));
        };

        let mut rows = self.sink.take();
        for (target, row) in rows.drain(..) {
            if self.settings.safe_mode && row.len() != meta.len() {
                return Err(Halt::Failed(self.arity_error(&row, &meta)));
            }
            for listener in &self.listeners {
                listener.row_written(&meta, &row);
            }
            match self.outputs.route(&meta, target.as_deref(), row) {
                Ok(()) => self.metrics.increment_written(),
                Err(RouteError::RowSet(e)) => return Err(self.row_set_halt(e)),
                Err(RouteError::Partition(e)) => return Err(Halt::Failed(StepError::Value(e))),
                Err(RouteError::UnknownTarget(name)) => {
                    let message = self.context.message(messages::UNKNOWN_TARGET, &[&name]);
                    return Err(Halt::Failed(StepError::Internal(message)));
                }
            }
        }
        self.sink.recycle(rows);
        Ok(())
    }

    fn reject(&mut self, row: Row, err: StepError) -> Result<(), Halt> {
        let row_error = match err.to_row_error() {
            Some(row_error) if self.errors.is_enabled() => row_error,
            _ => {
                return Err(Halt::Failed(match err {
                    // fields are resolved in bind, a miss here is an engine fault
                    StepError::FieldNotFound(name) => StepError::Internal(
                        self.context.message(messages::FIELD_NOT_FOUND, &[&name]),
                    ),
                    other => other,
                }))
            }
        };

        warn!("{}: row rejected: {}", self.label, row_error);
        let input = self.input_meta.clone().unwrap_or_default();
        let written = self
            .errors
            .put_error(&input, &row, &row_error, &self.listeners);
        if let Err(e) = written {
            return Err(self.row_set_halt(e));
        }

        let rejected = self.metrics.increment_rejected();
        if let Some(limit) = self.errors.exceeded_limit(rejected, self.metrics.lines_read()) {
            let message = match limit {
                RejectionLimit::MaxErrors { rejected, max } => self
                    .context
                    .message(messages::TOO_MANY_ERRORS, &[&rejected, &max]),
                RejectionLimit::MaxPercent { percent, max } => self
                    .context
                    .message(messages::TOO_MANY_ERRORS_PERCENT, &[&percent, &max]),
            };
            return Err(Halt::Failed(StepError::Fatal(message)));
        }
        Ok(())
    }

    fn row_set_halt(&self, err: RowSetError) -> Halt {
        // row sets are errored on purpose once the run halts
        if self.control.is_stopped() {
            Halt::Stopped
        } else {
            Halt::Failed(StepError::RowSet(err))
        }
    }

    fn set_output_done(&self) {
        self.outputs.set_done();
        self.errors.set_done();
    }

    fn finish(&mut self, outcome: Result<(), Halt>, started: Instant) {
        self.metrics
            .set_elapsed_micros(started.elapsed().as_micros() as u64);

        match outcome {
            Ok(()) => {
                self.set_output_done();
                self.transition(StepStatus::OutputDone);
                info!(
                    "{}: finished processing (I={}, O={}, R={}, E={})",
                    self.label,
                    self.metrics.lines_read(),
                    self.metrics.lines_written(),
                    self.metrics.lines_rejected(),
                    self.metrics.errors()
                );
                self.emit_finished();
            }
            Err(Halt::Stopped) => {
                self.set_output_done();
                self.transition(StepStatus::Stopped);
                info!("{}: stopped", self.label);
                self.emit_finished();
            }
            Err(Halt::Failed(err)) => self.fail(err.to_string()),
        }
    }

    fn fail(&mut self, message: String) {
        error!("{}: {}", self.label, message);
        self.metrics.increment_errors();
        self.control.abort();
        self.set_output_done();
        self.transition(StepStatus::Errored);
        emit_event(
            &self.events,
            ExecutionEvent::StepFailed {
                step: self.context.step_name().to_string(),
                copy: self.context.copy(),
                error: message.clone(),
            },
        );
        self.error_message = Some(message);
    }

    fn emit_finished(&self) {
        emit_event(
            &self.events,
            ExecutionEvent::StepFinished {
                step: self.context.step_name().to_string(),
                copy: self.context.copy(),
                status: self.status,
                lines_read: self.metrics.lines_read(),
                lines_written: self.metrics.lines_written(),
                lines_rejected: self.metrics.lines_rejected(),
            },
        );
    }
}

impl<S: Step> ExecutionUnit for StepExecutionUnit<S> {
    fn label(&self) -> &str {
        &self.label
    }

    fn step_name(&self) -> &str {
        self.context.step_name()
    }

    fn copy(&self) -> usize {
        self.context.copy()
    }

    fn metrics(&self) -> &Arc<StepMetrics> {
        &self.metrics
    }

    fn add_row_listener(&mut self, listener: Arc<dyn RowListener>) {
        self.listeners.push(listener);
    }

    fn init(&mut self) -> Result<(), StepError> {
        let config = Arc::clone(&self.config);
        let context = &self.context;
        let created = panic::catch_unwind(AssertUnwindSafe(|| {
            S::validate(&config, context)?;
            S::init(&config, context)
        }))
        .unwrap_or_else(|payload| Err(StepError::Fatal(panic_message(payload.as_ref()))));

        match created {
            Ok(step) => {
                self.step = Some(step);
                self.transition(StepStatus::Initialized);
                debug!("{}: initialized", self.label);
                Ok(())
            }
            Err(err) => {
                error!("{}: initialization failed: {}", self.label, err);
                self.metrics.increment_errors();
                self.error_message = Some(err.to_string());
                self.transition(StepStatus::Errored);
                Err(err)
            }
        }
    }

    fn run(&mut self) {
        let started = Instant::now();
        let Some(mut step) = self.step.take() else {
            let message = self.context.message(messages::NOT_INITIALIZED, &[]);
            self.fail(message);
            return;
        };

        self.transition(StepStatus::Running);
        emit_event(
            &self.events,
            ExecutionEvent::StepStarted {
                step: self.context.step_name().to_string(),
                copy: self.context.copy(),
            },
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if self.is_source {
                self.run_source(&mut step)
            } else {
                self.run_transform(&mut step)
            }
        }));
        self.step = Some(step);

        match outcome {
            Ok(outcome) => self.finish(outcome, started),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                let message = self.context.message(messages::STEP_PANICKED, &[&reason]);
                self.metrics
                    .set_elapsed_micros(started.elapsed().as_micros() as u64);
                self.fail(message);
            }
        }
    }

    fn fail_to_start(&mut self, message: String) {
        self.fail(message);
    }

    fn dispose(&mut self) {
        if self.status == StepStatus::Disposed {
            return;
        }
        if self.status == StepStatus::Initialized {
            // initialized but never started because another copy failed
            self.transition(StepStatus::Stopped);
        }
        if let Some(step) = self.step.take() {
            let context = &self.context;
            if panic::catch_unwind(AssertUnwindSafe(|| step.dispose(context))).is_err() {
                warn!("{}: panicked while disposing", self.label);
            }
        }
        self.transition(StepStatus::Disposed);
    }

    fn outcome(&self) -> StepStatus {
        self.outcome
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
