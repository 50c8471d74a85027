//! Execution scheduler - wires step copies together with row sets
//!
//! For every enabled hop the scheduler decides how the copies of the two
//! steps are connected and creates one row set per connected pair. Error
//! hops are wired the same way.

use crate::core::error::EngineError;
use crate::core::pipeline::PipelineMeta;
use crate::core::step::StepMeta;
use crate::execution::row_set::RowSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// How the copies on both ends of a hop are connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchType {
    /// One copy on each side
    OneToOne,
    /// One producer feeds every consumer copy
    OneToMany,
    /// Every producer copy feeds the single consumer
    ManyToOne,
    /// Equal copy counts, copy N feeds copy N
    ManyToMany,
    /// Every producer copy feeds every consumer copy
    Mesh,
}

impl DispatchType {
    /// Picks the wiring for a hop
    ///
    /// Partitioned consumers always get a row set from every producer copy,
    /// otherwise equal keys could end up in different consumer copies.
    pub fn for_hop(from_copies: usize, to_copies: usize, partitioned: bool) -> Self {
        match (from_copies, to_copies) {
            (1, 1) => DispatchType::OneToOne,
            (1, _) => DispatchType::OneToMany,
            (_, 1) => DispatchType::ManyToOne,
            (from, to) if from == to && !partitioned => DispatchType::ManyToMany,
            _ => DispatchType::Mesh,
        }
    }

    /// `(producer copy, consumer copy)` pairs connected by a row set
    pub fn copy_pairs(&self, from_copies: usize, to_copies: usize) -> Vec<(usize, usize)> {
        match self {
            DispatchType::OneToOne => vec![(0, 0)],
            DispatchType::OneToMany => (0..to_copies).map(|to| (0, to)).collect(),
            DispatchType::ManyToOne => (0..from_copies).map(|from| (from, 0)).collect(),
            DispatchType::ManyToMany => (0..from_copies).map(|copy| (copy, copy)).collect(),
            DispatchType::Mesh => (0..from_copies)
                .flat_map(|from| (0..to_copies).map(move |to| (from, to)))
                .collect(),
        }
    }
}

/// Row sets attached to one step copy
#[derive(Debug, Default)]
pub(crate) struct UnitPorts {
    pub inputs: Vec<Arc<RowSet>>,
    /// Row sets per target step, in hop order
    pub outputs: Vec<(String, Vec<Arc<RowSet>>)>,
    pub error_outputs: Vec<Arc<RowSet>>,
}

/// Every row set of a run, indexed by the step copy using it
#[derive(Debug, Default)]
pub(crate) struct ExecutionGraph {
    ports: HashMap<(String, usize), UnitPorts>,
    row_sets: Vec<Arc<RowSet>>,
}

impl ExecutionGraph {
    pub fn build(pipeline: &PipelineMeta) -> Result<Self, EngineError> {
        let mut graph = Self::default();
        let size = pipeline.settings.row_set_size;

        for from in pipeline.steps() {
            for to in pipeline.next_steps(&from.name) {
                graph.connect(from, to, size, false);
            }
            if let Some(target) = from.error_target() {
                let to = pipeline
                    .step(target)
                    .ok_or_else(|| EngineError::UnknownErrorTarget {
                        step: from.name.clone(),
                        target: target.to_string(),
                    })?;
                graph.connect(from, to, size, true);
            }
        }

        Ok(graph)
    }

    fn connect(&mut self, from: &StepMeta, to: &StepMeta, size: usize, error_hop: bool) {
        let dispatch = DispatchType::for_hop(from.copies, to.copies, to.is_partitioned());
        debug!(
            "Connecting {} -> {} ({:?}{})",
            from.name,
            to.name,
            dispatch,
            if error_hop { ", error rows" } else { "" }
        );

        for (from_copy, to_copy) in dispatch.copy_pairs(from.copies, to.copies) {
            let row_set = Arc::new(RowSet::between(&from.name, from_copy, &to.name, to_copy, size));

            self.ports
                .entry((to.name.clone(), to_copy))
                .or_default()
                .inputs
                .push(Arc::clone(&row_set));

            let producer = self.ports.entry((from.name.clone(), from_copy)).or_default();
            if error_hop {
                producer.error_outputs.push(Arc::clone(&row_set));
            } else {
                match producer.outputs.iter_mut().find(|(step, _)| *step == to.name) {
                    Some((_, sets)) => sets.push(Arc::clone(&row_set)),
                    None => producer.outputs.push((to.name.clone(), vec![Arc::clone(&row_set)])),
                }
            }

            self.row_sets.push(row_set);
        }
    }

    /// Removes and returns the ports of one step copy
    pub fn take_ports(&mut self, step: &str, copy: usize) -> UnitPorts {
        self.ports
            .remove(&(step.to_string(), copy))
            .unwrap_or_default()
    }

    pub fn row_sets(&self) -> &[Arc<RowSet>] {
        &self.row_sets
    }
}

/// Run-wide stop flag shared by every step copy
#[derive(Debug)]
pub(crate) struct RunControl {
    row_sets: Vec<Arc<RowSet>>,
    stopped: AtomicBool,
    stop_requested: AtomicBool,
}

impl RunControl {
    pub fn new(row_sets: Vec<Arc<RowSet>>) -> Self {
        Self {
            row_sets,
            stopped: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether the halt came from a caller rather than a failing step
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Stops the run on behalf of a caller
    pub fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            warn!("Stop requested, halting all steps");
        }
        self.halt();
    }

    /// Stops the run after a step failed
    pub fn abort(&self) {
        self.halt();
    }

    fn halt(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for row_set in &self.row_sets {
            row_set.set_errored();
        }
    }

    pub fn row_sets(&self) -> &[Arc<RowSet>] {
        &self.row_sets
    }
}

/// Stops a running pipeline from another thread or task
#[derive(Debug, Clone)]
pub struct StopHandle {
    control: Arc<RunControl>,
}

impl StopHandle {
    pub(crate) fn new(control: Arc<RunControl>) -> Self {
        Self { control }
    }

    /// Asks every step copy to halt; calling it again has no effect
    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }
}
