//! Main execution engine - orchestrates the entire pipeline run
//!
//! [`ExecutionEngine::prepare`] turns a pipeline definition into a
//! [`PipelineExecution`]: one execution unit per step copy, wired together
//! with row sets. [`PipelineExecution::start`] initializes every copy
//! concurrently and, if all succeeded, runs each copy on its own thread.

use crate::core::error::EngineError;
use crate::core::messages::MessageCatalog;
use crate::core::pipeline::PipelineMeta;
use crate::core::row::RowMeta;
use crate::core::state::{ExecutionStatus, PipelineState, StepMetrics, StepStatus};
use crate::core::variables::{self, VariableSpace};
use crate::execution::error_routing::ErrorRouter;
use crate::execution::executor::{ExecutionUnit, RowListener, UnitWiring};
use crate::execution::result::{PipelineResult, ProgressHandle, StepResult};
use crate::execution::routing::OutputRouter;
use crate::execution::row_set::RowSet;
use crate::execution::scheduler::{ExecutionGraph, RunControl, StopHandle};
use crate::steps::{StepContext, StepRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
    },
    StepStarted {
        step: String,
        copy: usize,
    },
    StepFinished {
        step: String,
        copy: usize,
        status: StepStatus,
        lines_read: u64,
        lines_written: u64,
        lines_rejected: u64,
    },
    StepFailed {
        step: String,
        copy: usize,
        error: String,
    },
    PipelineFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
///
/// Handlers run on the thread that raised the event, usually a step thread.
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

pub(crate) type EventHandlers = Arc<RwLock<Vec<EventHandler>>>;

/// Emit an event to all handlers
pub(crate) fn emit_event(handlers: &EventHandlers, event: ExecutionEvent) {
    let handlers = handlers.read().unwrap_or_else(PoisonError::into_inner);
    for handler in handlers.iter() {
        handler(event.clone());
    }
}

fn push_handler<F>(handlers: &EventHandlers, handler: F)
where
    F: Fn(ExecutionEvent) + Send + Sync + 'static,
{
    handlers
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Arc::new(handler));
}

/// A step copy shared with the thread running it, recoverable after the thread ended
type UnitSlot = Arc<Mutex<Option<Box<dyn ExecutionUnit>>>>;

/// Starts a named thread for a step copy
type Spawner = fn(&str, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>;

fn spawn_named(name: &str, task: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(task)
}

fn take_unit(slot: &UnitSlot) -> Option<Box<dyn ExecutionUnit>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    registry: Arc<StepRegistry>,
    messages: Arc<MessageCatalog>,
    parent_variables: Arc<VariableSpace>,
    event_handlers: EventHandlers,
}

impl ExecutionEngine {
    /// An engine whose pipelines inherit the process environment as variables
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            messages: Arc::new(MessageCatalog::english()),
            parent_variables: VariableSpace::from_env(),
            event_handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_messages(mut self, messages: MessageCatalog) -> Self {
        self.messages = Arc::new(messages);
        self
    }

    /// Scope that pipeline variables fall back to
    pub fn with_parent_variables(mut self, variables: Arc<VariableSpace>) -> Self {
        self.parent_variables = variables;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Add an event handler, shared by every execution of this engine
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        push_handler(&self.event_handlers, handler);
    }

    /// Checks the graph, the step types and every step configuration
    pub fn validate(&self, pipeline: &PipelineMeta) -> Result<(), EngineError> {
        pipeline.validate()?;
        let variables = self.pipeline_variables(pipeline, None);
        for step in pipeline.steps() {
            let factory = self.registry.factory(step)?;
            let context = self.context(pipeline, step, 0, &variables);
            factory.check(step, &context)?;
        }
        Ok(())
    }

    /// Builds the execution units and row sets of a run without starting it
    pub fn prepare(&self, pipeline: &PipelineMeta) -> Result<PipelineExecution, EngineError> {
        pipeline.validate()?;
        let order = pipeline.execution_order()?;
        for step in &order {
            self.registry.factory(step)?;
        }

        let state = PipelineState::new();
        let variables = self.pipeline_variables(pipeline, Some(state.execution_id));
        let mut graph = ExecutionGraph::build(pipeline)?;
        let control = Arc::new(RunControl::new(graph.row_sets().to_vec()));

        let mut units: Vec<Box<dyn ExecutionUnit>> = Vec::new();
        let mut progress = Vec::new();
        let mut error_layouts = HashMap::new();

        for step in order {
            let factory = self.registry.factory(step)?;
            let published: Arc<OnceLock<Arc<RowMeta>>> = Arc::new(OnceLock::new());
            error_layouts.insert(step.name.clone(), Arc::clone(&published));

            let mut wirings = Vec::with_capacity(step.copies);
            for copy in 0..step.copies {
                let ports = graph.take_ports(&step.name, copy);
                let mut outputs = OutputRouter::new(step.distribute);
                for (target, row_sets) in ports.outputs {
                    let partition = pipeline.step(&target).and_then(|s| s.partition_by.clone());
                    outputs.add_target(target, row_sets, partition);
                }
                let errors = ErrorRouter::new(
                    step.name.clone(),
                    step.error_handling.clone(),
                    ports.error_outputs,
                    Arc::clone(&published),
                );
                let metrics = Arc::new(StepMetrics::new());
                progress.push((step.name.clone(), copy, Arc::clone(&metrics)));

                wirings.push(UnitWiring {
                    context: self.context(pipeline, step, copy, &variables),
                    inputs: ports.inputs,
                    outputs,
                    errors,
                    metrics,
                    control: Arc::clone(&control),
                    settings: pipeline.settings.clone(),
                    events: Arc::clone(&self.event_handlers),
                });
            }
            units.extend(factory.create_units(step, wirings)?);
        }

        debug!(
            "Prepared pipeline {}: {} step copies, {} row sets",
            pipeline.name,
            units.len(),
            control.row_sets().len()
        );

        Ok(PipelineExecution {
            name: pipeline.name.clone(),
            state,
            units,
            handles: Vec::new(),
            spawner: spawn_named,
            control,
            progress: ProgressHandle::new(progress),
            error_layouts,
            variables,
            event_handlers: Arc::clone(&self.event_handlers),
            started: false,
            init_failed: false,
        })
    }

    /// Prepare, start and wait for a run
    ///
    /// Initialization failures still produce a result; only definition
    /// problems are returned as errors.
    pub fn execute(&self, pipeline: &PipelineMeta) -> Result<PipelineResult, EngineError> {
        let mut execution = self.prepare(pipeline)?;
        if let Err(err) = execution.start() {
            warn!("Pipeline {} did not start: {}", pipeline.name, err);
        }
        Ok(execution.wait_until_finished())
    }

    fn pipeline_variables(
        &self,
        pipeline: &PipelineMeta,
        execution_id: Option<Uuid>,
    ) -> Arc<VariableSpace> {
        let scope = VariableSpace::child_of(&self.parent_variables);
        scope.set_all(pipeline.variables.clone());
        scope.set(variables::INTERNAL_PIPELINE_NAME, pipeline.name.clone());
        if let Some(id) = execution_id {
            scope.set(variables::INTERNAL_EXECUTION_ID, id.to_string());
        }
        scope
    }

    fn context(
        &self,
        pipeline: &PipelineMeta,
        step: &crate::core::step::StepMeta,
        copy: usize,
        pipeline_variables: &Arc<VariableSpace>,
    ) -> StepContext {
        let scope = VariableSpace::child_of(pipeline_variables);
        scope.set(variables::INTERNAL_STEP_NAME, step.name.clone());
        scope.set(variables::INTERNAL_STEP_COPY_NR, copy.to_string());
        scope.set(variables::INTERNAL_STEP_COPIES, step.copies.to_string());

        let targets = pipeline
            .next_steps(&step.name)
            .into_iter()
            .map(|s| s.name.clone())
            .collect();

        StepContext::new(step.name.clone(), scope)
            .with_copy(copy, step.copies)
            .with_pipeline_name(pipeline.name.clone())
            .with_messages(Arc::clone(&self.messages))
            .with_targets(targets)
            .with_error_handling(step.handles_errors())
    }
}

/// A prepared pipeline run
pub struct PipelineExecution {
    name: String,
    state: PipelineState,
    units: Vec<Box<dyn ExecutionUnit>>,
    handles: Vec<(JoinHandle<()>, UnitSlot)>,
    spawner: Spawner,
    control: Arc<RunControl>,
    progress: ProgressHandle,
    error_layouts: HashMap<String, Arc<OnceLock<Arc<RowMeta>>>>,
    variables: Arc<VariableSpace>,
    event_handlers: EventHandlers,
    started: bool,
    init_failed: bool,
}

impl PipelineExecution {
    pub fn execution_id(&self) -> Uuid {
        self.state.execution_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.control))
    }

    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Every row set of the run
    pub fn row_sets(&self) -> &[Arc<RowSet>] {
        self.control.row_sets()
    }

    /// The pipeline scope; `set_variables` steps write here
    pub fn variables(&self) -> &Arc<VariableSpace> {
        &self.variables
    }

    /// Layout of the error rows of `step`, known once the step bound its input
    pub fn error_row_meta(&self, step: &str) -> Option<Arc<RowMeta>> {
        self.error_layouts.get(step).and_then(|l| l.get().cloned())
    }

    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        push_handler(&self.event_handlers, handler);
    }

    /// Attaches a listener to every copy of `step`; only before `start`
    pub fn add_row_listener(
        &mut self,
        step: &str,
        listener: Arc<dyn RowListener>,
    ) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        let mut found = false;
        for unit in self.units.iter_mut().filter(|u| u.step_name() == step) {
            unit.add_row_listener(Arc::clone(&listener));
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(EngineError::UnknownStep(step.to_string()))
        }
    }

    /// Initializes every step copy, then starts one thread per copy
    ///
    /// If any copy fails to initialize, no copy runs and every copy is disposed.
    /// A copy whose thread cannot be started fails the run; it and the copies
    /// after it are disposed before the error is returned.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.started = true;
        self.state.start(self.units.len());

        info!(
            "Starting pipeline execution: {} ({})",
            self.name, self.state.execution_id
        );
        emit_event(
            &self.event_handlers,
            ExecutionEvent::PipelineStarted {
                execution_id: self.state.execution_id,
                pipeline_name: self.name.clone(),
            },
        );

        let failures = self.init_units();
        if !failures.is_empty() {
            error!("Initialization failed for: {}", failures.join(", "));
            self.init_failed = true;
            self.control.abort();
            for unit in &mut self.units {
                unit.dispose();
            }
            return Err(EngineError::InitializationFailed(failures));
        }

        let mut pending = std::mem::take(&mut self.units).into_iter();
        while let Some(unit) = pending.next() {
            let label = unit.label().to_string();
            let slot: UnitSlot = Arc::new(Mutex::new(Some(unit)));
            let running = Arc::clone(&slot);
            let task = Box::new(move || {
                let mut slot = running.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(unit) = slot.as_mut() {
                    unit.run();
                }
            });

            match (self.spawner)(&label, task) {
                Ok(handle) => self.handles.push((handle, slot)),
                Err(source) => {
                    let err = EngineError::ThreadSpawn {
                        unit: label,
                        source,
                    };
                    error!("{}", err);
                    self.init_failed = true;
                    self.control.abort();
                    if let Some(mut unit) = take_unit(&slot) {
                        unit.fail_to_start(err.to_string());
                        unit.dispose();
                        self.units.push(unit);
                    }
                    // copies after the failed one never run
                    for mut unit in pending.by_ref() {
                        unit.dispose();
                        self.units.push(unit);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Runs `init` of every copy on its own thread and collects the failures
    fn init_units(&mut self) -> Vec<String> {
        thread::scope(|scope| {
            let pending: Vec<_> = self
                .units
                .iter_mut()
                .map(|unit| {
                    let label = unit.label().to_string();
                    let spawned = thread::Builder::new()
                        .name(format!("init {}", label))
                        .spawn_scoped(scope, move || unit.init().is_ok());
                    (label, spawned)
                })
                .collect();

            pending
                .into_iter()
                .filter_map(|(label, spawned)| match spawned {
                    Ok(handle) => match handle.join() {
                        Ok(true) => None,
                        _ => Some(label),
                    },
                    Err(err) => {
                        error!("{}: couldn't start init thread: {}", label, err);
                        Some(label)
                    }
                })
                .collect()
        })
    }

    /// Blocks until every step copy finished, disposes them and builds the result
    ///
    /// Starts the run first when that has not happened yet.
    pub fn wait_until_finished(mut self) -> PipelineResult {
        if !self.started {
            if let Err(err) = self.start() {
                warn!("Pipeline {} did not start: {}", self.name, err);
            }
        }

        let mut units = std::mem::take(&mut self.units);
        for (handle, slot) in self.handles.drain(..) {
            // units catch their own panics; this is a panic in the thread glue
            if handle.join().is_err() {
                error!("A step thread of {} panicked outside its step", self.name);
                self.init_failed = true;
            }
            if let Some(unit) = take_unit(&slot) {
                units.push(unit);
            }
        }
        for unit in &mut units {
            unit.dispose();
        }

        let steps: Vec<StepResult> = units
            .iter()
            .map(|unit| {
                let metrics = unit.metrics();
                StepResult {
                    step: unit.step_name().to_string(),
                    copy: unit.copy(),
                    status: unit.outcome(),
                    lines_read: metrics.lines_read(),
                    lines_written: metrics.lines_written(),
                    lines_rejected: metrics.lines_rejected(),
                    errors: metrics.errors(),
                    elapsed_ms: metrics.elapsed_micros() / 1000,
                    error: unit.error_message().map(str::to_string),
                }
            })
            .collect();

        let errors: u64 = steps.iter().map(|s| s.errors).sum();
        if self.control.stop_requested() {
            self.state.stop();
        } else if errors > 0 || self.init_failed {
            self.state.fail();
        } else {
            self.state.complete();
        }

        info!(
            "Pipeline execution finished: {} - {:?} ({} errors)",
            self.name, self.state.status, errors
        );
        emit_event(
            &self.event_handlers,
            ExecutionEvent::PipelineFinished {
                execution_id: self.state.execution_id,
                status: self.state.status,
            },
        );

        let finished_at = self.state.completed_at.unwrap_or_else(Utc::now);
        PipelineResult::new(
            self.state.execution_id,
            self.name.clone(),
            self.state.status,
            self.state.started_at.unwrap_or(finished_at),
            finished_at,
            steps,
        )
    }
}

impl Drop for PipelineExecution {
    fn drop(&mut self) {
        // dropped while running: halt the threads instead of leaking them blocked
        if !self.handles.is_empty() {
            self.control.stop();
        }
    }
}
